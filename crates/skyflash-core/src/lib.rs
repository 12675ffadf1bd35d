//! Skyflash Core - Core types for the Skytraxx firmware updater
//!
//! This crate provides the foundational types shared by every Skyflash crate:
//! - Device identity and the `.sys/hwsw.info` file format
//! - Firmware version parsing and the `.xlb` image header
//! - Download progress snapshots
//! - The run outcome taxonomy reported to callers
//! - Collaborator contracts consumed by the update orchestrator

pub mod backend;
pub mod collaborators;
pub mod device;
pub mod firmware;
pub mod hwsw;
pub mod outcome;
pub mod progress;

pub use backend::{BackendError, BackendResponse, BackendResult};
pub use collaborators::{ArchiveExtractor, ArchiveFetcher, DeviceProbe, DeviceUpdater};
pub use device::{DeviceInfo, SUPPORTED_MODEL};
pub use firmware::{FirmwareVersion, VersionError};
pub use hwsw::HwSwInfo;
pub use outcome::{FailureReason, RunOutcome, SuccessKind};
pub use progress::DownloadProgress;
