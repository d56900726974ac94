//! Firmhub Configuration Module
//! Handles loading and validating firmhub.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::device::Artifacts;
use crate::engine::github::GITHUB_API_URL;
use crate::engine::release::{ChecksumAlgorithm, ReleaseSource, ReleaseStore};

pub const CONFIG_FILE_NAME: &str = "firmhub.config.json";
pub const TOKEN_ENV_VAR: &str = "FIRMHUB_GITHUB_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub release: ReleaseConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_update_folder")]
    pub update_folder: PathBuf,
    #[serde(default)]
    pub checksum: ChecksumAlgorithm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseConfig {
    pub owner: String,
    pub repo: String,
    /// Assets to mirror; every asset when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_names: Option<Vec<String>>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Defaults to `<repo>_firmware.bin`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware_file: Option<String>,
    /// Defaults to `<repo>_spiffs.bin`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_file: Option<String>,
    #[serde(default = "default_true")]
    pub version_in_filename: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_update_folder() -> PathBuf {
    PathBuf::from("./update")
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_api_url() -> String {
    GITHUB_API_URL.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            update_folder: default_update_folder(),
            checksum: ChecksumAlgorithm::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            firmware_file: None,
            filesystem_file: None,
            version_in_filename: true,
        }
    }
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.to_path_buf()));
        }
        let content = std::fs::read_to_string(config_path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn default_for_source(owner: &str, repo: &str) -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            release: ReleaseConfig {
                owner: owner.to_string(),
                repo: repo.to_string(),
                file_names: None,
                interval_secs: default_interval_secs(),
                request_timeout_secs: default_request_timeout_secs(),
                api_url: default_api_url(),
                token: None,
            },
            device: DeviceConfig::default(),
            alerts: AlertConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.release.owner.trim().is_empty() || self.release.repo.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "release.owner and release.repo are required".to_string(),
            ));
        }
        if !is_plain_name(&self.release.repo) {
            return Err(ConfigError::Invalid(format!(
                "release.repo {:?} is not a plain name",
                self.release.repo
            )));
        }
        if self.release.interval_secs == 0 {
            return Err(ConfigError::Invalid("release.interval_secs must be positive".to_string()));
        }
        if self.release.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "release.request_timeout_secs must be positive".to_string(),
            ));
        }

        let device_files = [&self.device.firmware_file, &self.device.filesystem_file];
        let names = self
            .release
            .file_names
            .iter()
            .flatten()
            .chain(device_files.into_iter().flatten());
        for name in names {
            if !is_plain_name(name) {
                return Err(ConfigError::Invalid(format!("{:?} is not a plain file name", name)));
            }
        }
        Ok(())
    }

    pub fn source(&self) -> ReleaseSource {
        ReleaseSource::new(&self.release.owner, &self.release.repo)
    }

    /// Configured token, else the `FIRMHUB_GITHUB_TOKEN` environment variable
    pub fn token(&self) -> Option<String> {
        self.release
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty()))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.release.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.release.request_timeout_secs)
    }

    pub fn artifacts(&self) -> Artifacts {
        let defaults = Artifacts::for_repo(&self.release.repo);
        Artifacts {
            firmware: self.device.firmware_file.clone().unwrap_or(defaults.firmware),
            filesystem: self.device.filesystem_file.clone().unwrap_or(defaults.filesystem),
            version_in_filename: self.device.version_in_filename,
        }
    }

    pub fn release_store(&self) -> ReleaseStore {
        ReleaseStore::new(self.store.update_folder.clone(), self.source(), self.store.checksum)
            .with_required_files(self.release.file_names.clone())
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
