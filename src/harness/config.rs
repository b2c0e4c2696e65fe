//! Harness configuration types

use anyhow::{Context, Result};
use harness_core::{PlugType, PowerStatus};
use harness_manifest::{DEFAULT_FALLBACK_THRESHOLD, DEFAULT_FALLBACK_URL, DEFAULT_MANIFEST_URL};
use harness_uploader::DEFAULT_LOGGER_URL;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub manifest: ManifestConfig,
    #[serde(default)]
    pub uploader: UploaderConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            device: DeviceConfig::default(),
            store: StoreConfig::default(),
            manifest: ManifestConfig::default(),
            uploader: UploaderConfig::default(),
            relay: RelayConfig::default(),
            logging: LoggingConfig::default(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl AppConfig {
    /// Root directory for everything the harness writes
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir)
    }

    /// SQLite parameter database
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir().join("harness.db"))
    }

    /// Manifest cache directory
    pub fn manifest_dir(&self) -> PathBuf {
        self.data_dir().join("manifest")
    }

    /// Root of the files handed to the relay
    pub fn relay_root(&self) -> PathBuf {
        self.relay
            .root
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir().join("outbox"))
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

/// `~/.local/share/harness` or the platform equivalent
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("harness")
}

/// Device identity and simulated device state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_version_name")]
    pub version_name: String,
    #[serde(default = "default_version_code")]
    pub version_code: String,
    /// Used verbatim when set
    #[serde(default)]
    pub device_id: Option<String>,
    /// Hashed into the device id when no explicit id is set
    #[serde(default)]
    pub hardware_id: Option<String>,
    #[serde(default = "default_true")]
    pub connected: bool,
    #[serde(default)]
    pub power: PowerSource,
}

fn default_version_name() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_version_code() -> String {
    "1".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            version_name: default_version_name(),
            version_code: default_version_code(),
            device_id: None,
            hardware_id: None,
            connected: true,
            power: PowerSource::default(),
        }
    }
}

/// Initial power source of the simulated device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerSource {
    #[default]
    Ac,
    Usb,
    Wireless,
    Battery,
}

impl PowerSource {
    pub fn status(self) -> PowerStatus {
        match self {
            Self::Ac => PowerStatus::charging(PlugType::Ac),
            Self::Usb => PowerStatus::charging(PlugType::Usb),
            Self::Wireless => PowerStatus::charging(PlugType::Wireless),
            Self::Battery => PowerStatus::unplugged(),
        }
    }
}

/// Parameter store configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub path: Option<String>,
}

/// Manifest synchronizer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestConfig {
    #[serde(default = "default_manifest_url")]
    pub url: String,
    #[serde(default = "default_fallback_url")]
    pub fallback_url: String,
    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: u32,
    #[serde(default = "default_true")]
    pub compress: bool,
}

fn default_manifest_url() -> String {
    DEFAULT_MANIFEST_URL.to_string()
}

fn default_fallback_url() -> String {
    DEFAULT_FALLBACK_URL.to_string()
}

fn default_fallback_threshold() -> u32 {
    DEFAULT_FALLBACK_THRESHOLD
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            url: default_manifest_url(),
            fallback_url: default_fallback_url(),
            fallback_threshold: default_fallback_threshold(),
            compress: true,
        }
    }
}

/// Upload multiplexer configuration, used until the manifest says otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploaderConfig {
    #[serde(default = "default_logger_url")]
    pub logger_url: String,
    #[serde(default = "default_true")]
    pub compress: bool,
}

fn default_logger_url() -> String {
    DEFAULT_LOGGER_URL.to_string()
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            logger_url: default_logger_url(),
            compress: true,
        }
    }
}

/// File relay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub root: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: None,
        }
    }
}

/// Log output configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write daily-rotated log files here
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

fn default_file_prefix() -> String {
    "harness.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            file_prefix: default_file_prefix(),
        }
    }
}
