//! Manifest synchronizer configuration and status

use chrono::{DateTime, Utc};
use harness_core::Parameters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default manifest check interval (30 minutes)
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 1800;
/// Primary manifest endpoint used until the manifest says otherwise
pub const DEFAULT_MANIFEST_URL: &str = "https://backend.example.org/manifest/";
/// Secondary endpoint tried once the primary keeps failing
pub const DEFAULT_FALLBACK_URL: &str = "https://backup.example.org/manifest/";
/// Consecutive primary failures tolerated before the fallback is tried
pub const DEFAULT_FALLBACK_THRESHOLD: u32 = 6;
/// Per-exchange network timeout
pub const CONNECTION_TIMEOUT_SECS: u64 = 10;

/// Tunables delivered through the manifest itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestParameters {
    /// Seconds between checks
    pub check_interval_secs: u64,
    /// Primary manifest endpoint
    pub manifest_url: String,
    /// Only distribute when the downloaded manifest changed
    pub compare_files: bool,
    /// Only hand a receiver its entry when that entry changed
    pub compare_nodes: bool,
}

impl Default for ManifestParameters {
    fn default() -> Self {
        Self {
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            compare_files: true,
            compare_nodes: true,
        }
    }
}

impl Parameters for ManifestParameters {
    fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// Local settings that do not travel in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSettings {
    /// Directory holding the cached manifest and status document
    pub data_dir: PathBuf,
    /// Primary endpoint used for the initial parameters
    pub manifest_url: String,
    /// Fixed secondary endpoint
    pub fallback_url: String,
    /// Failures tolerated before the fallback endpoint is tried
    pub fallback_threshold: u32,
    /// Gzip the outbound status document
    pub compress: bool,
}

impl ManifestSettings {
    /// Settings with default endpoints rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            manifest_url: DEFAULT_MANIFEST_URL.to_string(),
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            fallback_threshold: DEFAULT_FALLBACK_THRESHOLD,
            compress: true,
        }
    }

    /// Set the primary endpoint
    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = url.into();
        self
    }

    /// Set the fallback endpoint
    pub fn with_fallback_url(mut self, url: impl Into<String>) -> Self {
        self.fallback_url = url.into();
        self
    }

    /// Set the fallback threshold
    pub fn with_fallback_threshold(mut self, threshold: u32) -> Self {
        self.fallback_threshold = threshold;
        self
    }

    /// Enable or disable compression of the status document
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }
}

/// Receiver entry as shown in the synchronizer's status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverSummary {
    /// Receiver's own name
    pub receiver_name: String,
    /// Last time the receiver was handed a manifest entry
    pub update_time: DateTime<Utc>,
}

/// Synchronizer-specific status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestStatus {
    /// Time the status was reported
    pub now: DateTime<Utc>,
    /// Last successful download
    pub downloaded_manifest: DateTime<Utc>,
    /// Last download whose content differed from the cached manifest
    pub new_manifest: DateTime<Utc>,
    /// Last time receiver states were collected
    pub state_collected: DateTime<Utc>,
    /// Build version name
    pub version_name: String,
    /// Build version code
    pub version_code: String,
    /// Consecutive primary endpoint failures
    pub fallback_count: u32,
    /// Registered receivers by key
    pub receivers: BTreeMap<String, ReceiverSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_uses_defaults() {
        let params: ManifestParameters =
            serde_json::from_value(serde_json::json!({"compare_nodes": false})).unwrap();
        assert!(!params.compare_nodes);
        assert!(params.compare_files);
        assert_eq!(params.check_interval(), Duration::from_secs(1800));
    }

    #[test]
    fn test_parameters_survive_serialization() {
        let params = ManifestParameters {
            check_interval_secs: 60,
            manifest_url: "https://example.org/m/".to_string(),
            compare_files: false,
            compare_nodes: true,
        };
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(serde_json::from_str::<ManifestParameters>(&json).unwrap(), params);
    }
}
