//! Locating the device volume

use skyflash_core::BackendError;
use std::path::{Component, Path, PathBuf};
use sysinfo::Disks;
use thiserror::Error;
use tracing::{debug, trace};

/// Volume label the vario mounts under
pub const DEFAULT_VOLUME_LABEL: &str = "Skytraxx";

#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("No volume labelled {0:?} is mounted")]
    NotMounted(String),
    #[error("Mount path {0} is not a directory")]
    InvalidMountPath(PathBuf),
    #[error("Volume lookup failed: {0}")]
    Lookup(String),
}

impl From<VolumeError> for BackendError {
    fn from(e: VolumeError) -> Self {
        BackendError::DeviceUnavailable(e.to_string())
    }
}

/// Where the device storage lives
///
/// Normally found by label among the mounted disks. A fixed mount path can be
/// configured instead, e.g. for a manually mounted device or a test directory.
#[derive(Debug, Clone)]
pub struct DeviceVolume {
    label: String,
    mount_override: Option<PathBuf>,
}

impl Default for DeviceVolume {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME_LABEL)
    }
}

impl DeviceVolume {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            mount_override: None,
        }
    }

    /// Use a fixed mount path instead of looking the volume up by label
    pub fn with_mount_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_override = Some(path.into());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Resolve the current mount point (blocking)
    pub fn locate(&self) -> Result<PathBuf, VolumeError> {
        if let Some(path) = &self.mount_override {
            if !path.is_dir() {
                return Err(VolumeError::InvalidMountPath(path.clone()));
            }
            trace!(path = %path.display(), "Using configured mount path");
            return Ok(path.clone());
        }

        let mountpoint =
            find_mountpoint(&self.label).ok_or_else(|| VolumeError::NotMounted(self.label.clone()))?;
        debug!(label = %self.label, mountpoint = %mountpoint.display(), "Found device volume");
        Ok(mountpoint)
    }

    /// Resolve the current mount point without blocking the runtime
    pub async fn locate_async(&self) -> Result<PathBuf, VolumeError> {
        let volume = self.clone();
        tokio::task::spawn_blocking(move || volume.locate())
            .await
            .map_err(|e| VolumeError::Lookup(e.to_string()))?
    }
}

/// Find the mount point of the first disk whose name matches `label`
/// (ASCII case-insensitive)
fn find_mountpoint(label: &str) -> Option<PathBuf> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .find(|disk| disk.name().eq_ignore_ascii_case(label))
        .map(|disk| disk.mount_point().to_path_buf())
}

/// Join a relative path onto the mount point
///
/// Absolute paths and `..` components are rejected so configured file names
/// cannot escape the device volume.
pub fn resolve_relative(mountpoint: &Path, relative: &str) -> Result<PathBuf, BackendError> {
    let path = Path::new(relative);
    let is_plain = path.components().count() > 0
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !is_plain {
        return Err(BackendError::InvalidData(format!(
            "path {:?} must be relative to the device volume",
            relative
        )));
    }
    Ok(mountpoint.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_with_mount_override() {
        let dir = tempfile::tempdir().unwrap();
        let volume = DeviceVolume::default().with_mount_path(dir.path());
        assert_eq!(volume.locate().unwrap(), dir.path());
    }

    #[test]
    fn test_locate_override_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not-mounted");
        let volume = DeviceVolume::default().with_mount_path(&missing);
        assert!(matches!(volume.locate(), Err(VolumeError::InvalidMountPath(p)) if p == missing));
    }

    #[test]
    fn test_locate_unknown_label() {
        let volume = DeviceVolume::new("skyflash-no-such-volume-7f3a");
        assert!(matches!(volume.locate(), Err(VolumeError::NotMounted(_))));
    }

    #[test]
    fn test_volume_error_maps_to_device_unavailable() {
        let err: BackendError = VolumeError::NotMounted("Skytraxx".to_string()).into();
        assert!(matches!(err, BackendError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_resolve_relative() {
        let root = Path::new("/media/skytraxx");
        assert_eq!(
            resolve_relative(root, "skytraxx_update.tar").unwrap(),
            root.join("skytraxx_update.tar")
        );
        assert!(resolve_relative(root, "../etc/passwd").is_err());
        assert!(resolve_relative(root, "/etc/passwd").is_err());
        assert!(resolve_relative(root, "").is_err());
    }
}
