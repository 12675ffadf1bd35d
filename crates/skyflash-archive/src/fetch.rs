//! Streaming archive download with progress reporting
//!
//! The archive is written to `<name>.part` and renamed once complete (and
//! verified, when a SHA-256 is configured). Dropping the fetch future at any
//! point removes the partial file.

use async_trait::async_trait;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use skyflash_core::{ArchiveFetcher, BackendError, BackendResult, DownloadProgress};
use skyflash_device::{resolve_relative, DeviceVolume};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Connect timeout used when none is configured
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Downloads the update archive over HTTP(S) onto the device volume
pub struct HttpArchiveFetcher {
    client: reqwest::Client,
    volume: DeviceVolume,
    expected_sha256: Option<String>,
}

impl HttpArchiveFetcher {
    pub fn new(volume: DeviceVolume, connect_timeout: Duration) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("skyflash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            volume,
            expected_sha256: None,
        })
    }

    /// Require the downloaded archive to hash to `sha256` (hex)
    pub fn with_expected_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.expected_sha256 = Some(sha256.into());
        self
    }
}

#[async_trait]
impl ArchiveFetcher for HttpArchiveFetcher {
    async fn fetch(
        &self,
        url: &str,
        file_name: &str,
        progress: mpsc::Sender<DownloadProgress>,
    ) -> BackendResult<()> {
        let mountpoint = self.volume.locate_async().await?;
        let target = resolve_relative(&mountpoint, file_name)?;

        info!(url = %url, target = %target.display(), "Downloading update archive");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BackendError::Http(format!("Failed to download archive: {}", e)))?;

        if !response.status().is_success() {
            return Err(BackendError::Http(format!(
                "Archive download failed with status {}",
                response.status()
            )));
        }

        let total = response.content_length().unwrap_or(0);
        let mut partial = PartialFile::create(part_path(&target)).await?;
        report(&progress, DownloadProgress::new(total, 0));

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| BackendError::Http(format!("Failed to get chunk: {}", e)))?;
            partial.write_all(&chunk).await?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
            report(&progress, DownloadProgress::new(total, downloaded));
        }

        if let Some(expected) = &self.expected_sha256 {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected) {
                warn!(expected = %expected, actual = %actual, "Archive checksum mismatch");
                return Err(BackendError::InvalidData(format!(
                    "SHA256 mismatch: expected {}, got {}",
                    expected, actual
                )));
            }
            debug!(sha256 = %actual, "Archive checksum verified");
        }

        partial.commit(&target).await?;
        report(&progress, DownloadProgress::new(total, downloaded));

        info!(bytes = downloaded, total = total, "Archive download complete");
        Ok(())
    }
}

/// Best-effort progress delivery; a slow or gone listener never stalls the download
fn report(progress: &mpsc::Sender<DownloadProgress>, snapshot: DownloadProgress) {
    trace!(downloaded = snapshot.downloaded, total = snapshot.total, "Download progress");
    let _ = progress.try_send(snapshot);
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// A file being downloaded; removed on drop unless committed
struct PartialFile {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    committed: bool,
}

impl PartialFile {
    async fn create(path: PathBuf) -> BackendResult<Self> {
        let file = tokio::fs::File::create(&path).await?;
        Ok(Self {
            path,
            file: Some(file),
            committed: false,
        })
    }

    async fn write_all(&mut self, data: &[u8]) -> BackendResult<()> {
        match self.file.as_mut() {
            Some(file) => Ok(file.write_all(data).await?),
            None => Err(BackendError::InvalidData("partial file already closed".to_string())),
        }
    }

    /// Flush, close and move the file into place
    async fn commit(&mut self, target: &Path) -> BackendResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&self.path, target).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            drop(self.file.take());
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
