//! Tar extraction onto the device volume
//!
//! The archive is unpacked into a staging directory next to the payload
//! directory and only renamed into place after the firmware version has been
//! read successfully, so a failed extraction never leaves a usable payload.
//! Dropping the extract future stops the unpacking at the next archive entry
//! and removes the staging directory.

use async_trait::async_trait;
use skyflash_core::firmware::{read_payload_version, PAYLOAD_DIR};
use skyflash_core::{ArchiveExtractor, BackendError, BackendResult};
use skyflash_device::{resolve_relative, DeviceVolume};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tar::Archive;
use tracing::{debug, info, warn};

/// Unpacks the downloaded tar archive into `unpacked/`
#[derive(Debug, Clone)]
pub struct TarArchiveExtractor {
    volume: DeviceVolume,
    /// Held by the blocking task for its whole lifetime; a new extraction
    /// waits until an abandoned one has cleaned up its staging directory
    busy: Arc<Mutex<()>>,
}

impl TarArchiveExtractor {
    pub fn new(volume: DeviceVolume) -> Self {
        Self {
            volume,
            busy: Arc::new(Mutex::new(())),
        }
    }

    fn extract_blocking(
        volume: &DeviceVolume,
        tar_path: &str,
        cancelled: &AtomicBool,
    ) -> BackendResult<String> {
        check_cancelled(cancelled)?;
        let mountpoint = volume.locate()?;
        let archive = resolve_relative(&mountpoint, tar_path)?;
        let payload = mountpoint.join(PAYLOAD_DIR);
        let staging = mountpoint.join(format!("{}.partial", PAYLOAD_DIR));

        // Never build on top of a payload left behind by an earlier run
        remove_dir_if_exists(&payload)?;
        remove_dir_if_exists(&staging)?;

        let version = match unpack_and_read_version(&archive, &staging, cancelled) {
            Ok(version) => version,
            Err(e) => {
                if let Err(cleanup) = remove_dir_if_exists(&staging) {
                    warn!(path = %staging.display(), error = %cleanup, "Failed to remove staging directory");
                }
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&staging, &payload) {
            let _ = remove_dir_if_exists(&staging);
            return Err(e.into());
        }

        debug!(payload = %payload.display(), "Payload moved into place");
        Ok(version)
    }
}

/// Sets the flag when the async side stops waiting
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ArchiveExtractor for TarArchiveExtractor {
    async fn extract(&self, tar_path: &str) -> BackendResult<String> {
        let volume = self.volume.clone();
        let tar_path = tar_path.to_string();
        let busy = self.busy.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancelled.clone());

        let version = tokio::task::spawn_blocking(move || {
            // A panicked extraction leaves nothing the next one relies on
            let _lock = busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self::extract_blocking(&volume, &tar_path, &cancelled)
        })
        .await
        .map_err(|e| BackendError::InvalidData(format!("Extraction task failed: {}", e)))??;
        info!(version = %version.trim_matches('\0'), "Extracted update archive");
        Ok(version)
    }
}

fn unpack_and_read_version(
    archive: &Path,
    staging: &Path,
    cancelled: &AtomicBool,
) -> BackendResult<String> {
    let file = File::open(archive)?;
    fs::create_dir_all(staging)?;

    let mut archive = Archive::new(file);
    let entries = archive.entries().map_err(unpack_error)?;
    for entry in entries {
        check_cancelled(cancelled)?;
        let mut entry = entry.map_err(unpack_error)?;
        entry.unpack_in(staging).map_err(unpack_error)?;
    }
    check_cancelled(cancelled)?;

    read_payload_version(staging)
        .map_err(|e| BackendError::InvalidData(format!("Failed to read firmware version: {}", e)))
}

fn check_cancelled(cancelled: &AtomicBool) -> BackendResult<()> {
    if cancelled.load(Ordering::SeqCst) {
        return Err(BackendError::Io(io::Error::new(
            io::ErrorKind::Interrupted,
            "extraction cancelled",
        )));
    }
    Ok(())
}

fn unpack_error(e: io::Error) -> BackendError {
    BackendError::InvalidData(format!("Failed to unpack archive: {}", e))
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
