//! Configuration loading and collaborator wiring

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use skyflash_archive::{HttpArchiveFetcher, TarArchiveExtractor};
use skyflash_core::SUPPORTED_MODEL;
use skyflash_device::{DeviceVolume, VolumeProbe, VolumeUpdater, DEFAULT_VOLUME_LABEL};
use skyflash_ota::orchestrator::{DEFAULT_ARCHIVE_FILE_NAME, DEFAULT_ARCHIVE_URL};
use skyflash_ota::{OrchestratorSettings, UpdateOrchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Label of the volume the vario mounts as
    #[serde(default = "default_volume_label")]
    pub volume_label: String,
    /// Device model allowed to be updated
    #[serde(default = "default_supported_model")]
    pub supported_model: String,
    /// Fixed mount path, skips the volume lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_path: Option<PathBuf>,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            volume_label: default_volume_label(),
            supported_model: default_supported_model(),
            mount_path: None,
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_volume_label() -> String {
    DEFAULT_VOLUME_LABEL.to_string()
}

fn default_supported_model() -> String {
    SUPPORTED_MODEL.to_string()
}

fn default_probe_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Update archive URL
    #[serde(default = "default_archive_url")]
    pub url: String,
    /// File name of the archive on the device volume
    #[serde(default = "default_archive_file_name")]
    pub file_name: String,
    /// Whole download, including streaming the body
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Expected SHA-256 of the archive (hex), verified before use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// HTTP connect timeout
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            url: default_archive_url(),
            file_name: default_archive_file_name(),
            fetch_timeout_secs: default_fetch_timeout(),
            sha256: None,
            http_timeout_secs: default_http_timeout(),
        }
    }
}

fn default_archive_url() -> String {
    DEFAULT_ARCHIVE_URL.to_string()
}

fn default_archive_file_name() -> String {
    DEFAULT_ARCHIVE_FILE_NAME.to_string()
}

fn default_fetch_timeout() -> u64 {
    900 // archives are ~100 MB, slow links need a while
}

fn default_http_timeout() -> u64 {
    30
}

/// Development archive server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory whose files are served
    #[serde(default = "default_folder")]
    pub folder: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            folder: default_folder(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_folder() -> PathBuf {
    PathBuf::from(".")
}

impl Config {
    /// Device volume described by the `[device]` section
    pub fn volume(&self) -> DeviceVolume {
        let volume = DeviceVolume::new(&self.device.volume_label);
        match &self.device.mount_path {
            Some(path) => volume.with_mount_path(path),
            None => volume,
        }
    }

    pub fn to_orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            archive_url: self.archive.url.clone(),
            archive_file_name: self.archive.file_name.clone(),
            supported_model: self.device.supported_model.clone(),
            probe_timeout: Duration::from_secs(self.device.probe_timeout_secs),
            fetch_timeout: Duration::from_secs(self.archive.fetch_timeout_secs),
        }
    }

    /// Orchestrator wired to the mass-storage and HTTP collaborators
    pub fn build_orchestrator(&self) -> Result<UpdateOrchestrator> {
        let volume = self.volume();

        let mut fetcher = HttpArchiveFetcher::new(
            volume.clone(),
            Duration::from_secs(self.archive.http_timeout_secs),
        )
        .context("Failed to set up archive download")?;
        if let Some(sha256) = &self.archive.sha256 {
            fetcher = fetcher.with_expected_sha256(sha256.clone());
        }

        Ok(UpdateOrchestrator::new(
            self.to_orchestrator_settings(),
            Arc::new(VolumeProbe::new(volume.clone())),
            Arc::new(fetcher),
            Arc::new(TarArchiveExtractor::new(volume.clone())),
            Arc::new(VolumeUpdater::new(volume)),
        ))
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
