//! Device identity as reported by the vario

use serde::{Deserialize, Serialize};

/// The only model identifier the updater accepts
pub const SUPPORTED_MODEL: &str = "5mini";

/// Prefix the device puts in front of its software build number
pub const BUILD_PREFIX: &str = "build-";

/// Identity snapshot of the connected device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Model identifier (e.g., "5mini")
    pub device_name: String,
    /// Software build number as a decimal string (e.g., "202401150930")
    pub software_version: String,
}

impl DeviceInfo {
    /// Build a device info from raw `hw`/`sw` values, stripping the build prefix
    pub fn from_raw(hw: &str, sw: &str) -> Self {
        Self {
            device_name: hw.to_string(),
            software_version: sw.replace(BUILD_PREFIX, ""),
        }
    }

    /// Whether this device is the model identified by `model`
    pub fn is_model(&self, model: &str) -> bool {
        self.device_name == model
    }
}
