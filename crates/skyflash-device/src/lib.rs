//! Skyflash Device - access to the vario over USB mass storage
//!
//! The vario shows up as a removable volume. This crate locates that volume
//! and implements the device-facing collaborators on top of it:
//! - [`VolumeProbe`] reads identity and firmware version from `.sys/hwsw.info`
//! - [`VolumeUpdater`] writes the extracted payload and removes leftovers

pub mod probe;
pub mod updater;
pub mod volume;

pub use probe::VolumeProbe;
pub use updater::VolumeUpdater;
pub use volume::{resolve_relative, DeviceVolume, VolumeError, DEFAULT_VOLUME_LABEL};
