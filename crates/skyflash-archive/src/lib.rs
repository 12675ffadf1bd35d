//! Skyflash Archive - update archive handling
//!
//! - [`HttpArchiveFetcher`] streams the archive onto the device volume
//! - [`TarArchiveExtractor`] unpacks it and reads the contained firmware version

pub mod extract;
pub mod fetch;

pub use extract::TarArchiveExtractor;
pub use fetch::HttpArchiveFetcher;
