//! Configuration and status records shared by every periodic task

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

/// Check interval used when a task does not pick its own
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 3600;

/// Immutable snapshot of a task's tunables.
///
/// Updates replace the whole value; value equality decides whether an update
/// is a no-op. Implementations are serialized as JSON when persisted and when
/// they arrive through the manifest.
pub trait Parameters:
    Clone + PartialEq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// How often the task's periodic timer fires
    fn check_interval(&self) -> Duration;
}

/// Point-in-time report of a task's lifecycle and task-specific status.
///
/// `status` is flattened so a serialized state reads as a single object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskState<P, S> {
    /// First time the task was started
    pub started: DateTime<Utc>,
    /// Most recent start after the first one
    pub restarted: DateTime<Utc>,
    /// Completion time of the most recent check
    pub last_check: DateTime<Utc>,
    /// Last time new parameters were applied
    pub parameter_update: DateTime<Utc>,
    /// Parameters currently in effect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<P>,
    /// Task-specific status fields
    #[serde(flatten)]
    pub status: S,
}

impl<P, S> TaskState<P, S> {
    /// Create an empty state around the given status record
    pub fn new(status: S) -> Self {
        Self {
            started: DateTime::default(),
            restarted: DateTime::default(),
            last_check: DateTime::default(),
            parameter_update: DateTime::default(),
            parameters: None,
            status,
        }
    }

    /// Whether the task has ever been started
    pub fn has_started(&self) -> bool {
        self.started != DateTime::<Utc>::default()
    }
}
