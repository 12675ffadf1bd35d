//! Device identity probe backed by the `.sys/hwsw.info` file

use async_trait::async_trait;
use skyflash_core::hwsw::{HWSW_INFO_PATH, KEY_HARDWARE, KEY_SOFTWARE};
use skyflash_core::{BackendError, BackendResult, DeviceInfo, DeviceProbe, HwSwInfo};
use tracing::debug;

use crate::volume::DeviceVolume;

/// Reads the device identity from its volume
#[derive(Debug, Clone)]
pub struct VolumeProbe {
    volume: DeviceVolume,
}

impl VolumeProbe {
    pub fn new(volume: DeviceVolume) -> Self {
        Self { volume }
    }
}

#[async_trait]
impl DeviceProbe for VolumeProbe {
    async fn detect(&self) -> BackendResult<DeviceInfo> {
        let mountpoint = self.volume.locate_async().await?;
        let content = tokio::fs::read_to_string(mountpoint.join(HWSW_INFO_PATH)).await?;
        let info = HwSwInfo::parse(&content);
        if info.is_empty() {
            return Err(BackendError::InvalidData(format!(
                "{} has no entries",
                HWSW_INFO_PATH
            )));
        }

        let hw = info
            .get(KEY_HARDWARE)
            .ok_or_else(|| BackendError::InvalidData("device_name not found".to_string()))?;
        let sw = info
            .get(KEY_SOFTWARE)
            .ok_or_else(|| BackendError::InvalidData("software_version not found".to_string()))?;

        let device = DeviceInfo::from_raw(hw, sw);
        debug!(
            device_name = %device.device_name,
            software_version = %device.software_version,
            "Read device identity"
        );
        Ok(device)
    }
}
