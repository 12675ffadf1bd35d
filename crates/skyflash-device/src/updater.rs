//! Writing the extracted payload onto the device volume

use async_trait::async_trait;
use skyflash_core::device::BUILD_PREFIX;
use skyflash_core::firmware::{read_payload_version, PAYLOAD_DIR};
use skyflash_core::hwsw::{HWSW_INFO_PATH, KEY_SOFTWARE};
use skyflash_core::{BackendError, BackendResult, DeviceUpdater, FirmwareVersion, HwSwInfo};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::volume::{resolve_relative, DeviceVolume};

/// Applies the payload extracted under `unpacked/` to the device volume
#[derive(Debug, Clone)]
pub struct VolumeUpdater {
    volume: DeviceVolume,
}

impl VolumeUpdater {
    pub fn new(volume: DeviceVolume) -> Self {
        Self { volume }
    }

    fn apply_blocking(volume: &DeviceVolume) -> BackendResult<FirmwareVersion> {
        let mountpoint = volume.locate()?;
        let payload = mountpoint.join(PAYLOAD_DIR);
        if !payload.is_dir() {
            return Err(BackendError::InvalidData(format!(
                "no extracted payload at {}",
                payload.display()
            )));
        }

        let version: FirmwareVersion = read_payload_version(&payload)?
            .parse()
            .map_err(|e: skyflash_core::VersionError| BackendError::InvalidData(e.to_string()))?;

        let copied = copy_tree(&payload, &mountpoint)?;
        debug!(files = copied, "Copied payload onto device volume");

        let info_path = mountpoint.join(HWSW_INFO_PATH);
        let mut hwsw = HwSwInfo::parse(&fs::read_to_string(&info_path)?);
        hwsw.set(KEY_SOFTWARE, &format!("{}{}", BUILD_PREFIX, version));
        fs::write(&info_path, hwsw.render())?;

        Ok(version)
    }

    fn cleanup_blocking(volume: &DeviceVolume, tar_path: &str) -> BackendResult<()> {
        let mountpoint = volume.locate()?;
        let archive = resolve_relative(&mountpoint, tar_path)?;

        let archive_result = ignore_missing(fs::remove_file(&archive));
        if let Err(e) = &archive_result {
            warn!(path = %archive.display(), error = %e, "Failed to remove archive");
        }
        let payload = mountpoint.join(PAYLOAD_DIR);
        let payload_result = ignore_missing(fs::remove_dir_all(&payload));
        if let Err(e) = &payload_result {
            warn!(path = %payload.display(), error = %e, "Failed to remove payload");
        }

        archive_result?;
        payload_result?;
        Ok(())
    }
}

#[async_trait]
impl DeviceUpdater for VolumeUpdater {
    async fn apply(&self) -> BackendResult<()> {
        let volume = self.volume.clone();
        let version = tokio::task::spawn_blocking(move || Self::apply_blocking(&volume))
            .await
            .map_err(|e| BackendError::DeviceUnavailable(e.to_string()))??;
        info!(version = %version, "Firmware payload written to device");
        Ok(())
    }

    async fn cleanup(&self, tar_path: &str) -> BackendResult<()> {
        let volume = self.volume.clone();
        let tar_path = tar_path.to_string();
        tokio::task::spawn_blocking(move || Self::cleanup_blocking(&volume, &tar_path))
            .await
            .map_err(|e| BackendError::DeviceUnavailable(e.to_string()))??;
        debug!("Removed archive and payload from device");
        Ok(())
    }
}

/// Recursively copy `src` into `dst`, overwriting files; returns the file count
fn copy_tree(src: &Path, dst: &Path) -> io::Result<usize> {
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            copied += copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
