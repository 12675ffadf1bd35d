//! Contracts of the external operations the update orchestrator drives
//!
//! Every call returns a [`BackendResult`]; implementations must report
//! failures through it rather than panicking. Paths (`file_name`,
//! `tar_path`) are relative to the storage the implementation owns.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backend::BackendResult;
use crate::device::DeviceInfo;
use crate::progress::DownloadProgress;

/// Reads identity and installed firmware version of the connected device.
///
/// Must be idempotent and free of side effects on the device.
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    async fn detect(&self) -> BackendResult<DeviceInfo>;
}

/// Downloads the update archive to `file_name`.
///
/// Progress goes to `progress` at the fetcher's own cadence, at least once at
/// start and once at completion. Sends are best-effort: a full or closed
/// channel never fails the fetch. Dropping the returned future must not leave
/// a partially written archive behind.
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        file_name: &str,
        progress: mpsc::Sender<DownloadProgress>,
    ) -> BackendResult<()>;
}

/// Extracts the archive and returns the raw firmware version it contains.
///
/// All-or-nothing: on failure no payload may remain that `apply` could use.
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    async fn extract(&self, tar_path: &str) -> BackendResult<String>;
}

/// Device-destructive operations
#[async_trait]
pub trait DeviceUpdater: Send + Sync {
    /// Write the extracted payload onto the detected device
    async fn apply(&self) -> BackendResult<()>;

    /// Remove the archive and extracted payload
    async fn cleanup(&self, tar_path: &str) -> BackendResult<()>;
}
