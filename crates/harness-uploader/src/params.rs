//! Upload multiplexer configuration and status

use chrono::{DateTime, Utc};
use harness_core::{Parameters, PlugType, PowerStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default interval between upload cycles while uploading is enabled (15 minutes)
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 900;
/// Default upload endpoint
pub const DEFAULT_LOGGER_URL: &str = "https://backend.example.org/uploader/";
/// Default per-file failures tolerated in one batch
pub const DEFAULT_FAILURE_COUNT: u32 = 8;
/// Default per-transfer timeout
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;

/// Power condition under which uploading is allowed.
///
/// Only the plug counts: a full battery that stopped charging is still on
/// external power.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerPolicy {
    /// Plugged into a wall charger
    AcPlug,
    /// Plugged into USB or a wall charger
    #[default]
    UsbPlug,
}

impl PowerPolicy {
    /// Whether `power` satisfies the policy
    pub fn is_satisfied(self, power: PowerStatus) -> bool {
        match self {
            Self::AcPlug => power.plug == Some(PlugType::Ac),
            Self::UsbPlug => matches!(power.plug, Some(PlugType::Ac | PlugType::Usb)),
        }
    }
}

/// Upload multiplexer tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderParameters {
    /// Seconds between upload cycles while enabled
    pub check_interval_secs: u64,
    /// Base URL files are posted under
    pub logger_url: String,
    /// Power condition for uploading
    pub power_policy: PowerPolicy,
    /// Per-transfer timeout
    pub connection_timeout_secs: u64,
    /// Failures tolerated before a batch is abandoned
    pub failure_count: u32,
    /// Gzip file contents
    pub compress: bool,
}

impl Default for UploaderParameters {
    fn default() -> Self {
        Self {
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            logger_url: DEFAULT_LOGGER_URL.to_string(),
            power_policy: PowerPolicy::default(),
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            failure_count: DEFAULT_FAILURE_COUNT,
            compress: true,
        }
    }
}

impl Parameters for UploaderParameters {
    fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// Registered source as reported in the status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Source name
    pub name: String,
    /// Priority, lower first
    pub priority: u32,
}

/// Upload multiplexer status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploaderStatus {
    /// End of the last upload cycle
    pub last_upload: DateTime<Utc>,
    /// Bytes sent in the last upload cycle
    pub uploaded_bytes: u64,
    /// Registered sources in service order
    pub ordered_sources: Vec<SourceSummary>,
    /// Network available at the last gate check
    pub network: bool,
    /// Power policy satisfied at the last gate check
    pub power: bool,
    /// Bytes pending when the current batch started
    pub batch_total_bytes: u64,
    /// Bytes sent so far in the current batch
    pub batch_uploaded_bytes: u64,
}
