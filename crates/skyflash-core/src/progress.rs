//! Download progress snapshots

use serde::{Deserialize, Serialize};

/// Point-in-time download progress
///
/// `total` is taken from the response length and is `0` when unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub total: u64,
    pub downloaded: u64,
}

impl DownloadProgress {
    pub fn new(total: u64, downloaded: u64) -> Self {
        Self { total, downloaded }
    }

    /// Percentage in `[0, 100]`, or `None` while the total is unknown
    pub fn percentage(&self) -> Option<f32> {
        if self.total == 0 {
            return None;
        }
        let percent = self.downloaded as f64 / self.total as f64 * 100.0;
        Some(percent.clamp(0.0, 100.0) as f32)
    }
}
