use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Events published by the platform and by tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformEvent {
    /// A task's timer expired
    Check {
        /// Name of the task whose timer fired
        task: String,
    },
    /// External power was connected
    PowerConnected,
    /// External power was disconnected
    PowerDisconnected,
    /// Network connectivity changed
    ConnectivityChanged,
    /// A relayed file finished uploading
    UploadCompleted {
        /// Local path of the uploaded file
        path: PathBuf,
    },
}

impl PlatformEvent {
    /// Tag used to match this event against trigger sets
    #[must_use]
    pub fn tag(&self) -> EventTag {
        match self {
            Self::Check { task } => EventTag::Check(task.clone()),
            Self::PowerConnected => EventTag::PowerConnected,
            Self::PowerDisconnected => EventTag::PowerDisconnected,
            Self::ConnectivityChanged => EventTag::ConnectivityChanged,
            Self::UploadCompleted { .. } => EventTag::UploadCompleted,
        }
    }
}

/// Kind of event a task can be triggered by
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    /// Timer expiration for the named task
    Check(String),
    /// External power connected
    PowerConnected,
    /// External power disconnected
    PowerDisconnected,
    /// Network connectivity changed
    ConnectivityChanged,
    /// Relayed upload finished
    UploadCompleted,
}

impl EventTag {
    /// Timer tag for the named task
    pub fn check(task: impl Into<String>) -> Self {
        Self::Check(task.into())
    }
}

impl std::fmt::Display for EventTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Check(task) => write!(f, "check:{}", task),
            Self::PowerConnected => write!(f, "power_connected"),
            Self::PowerDisconnected => write!(f, "power_disconnected"),
            Self::ConnectivityChanged => write!(f, "connectivity_changed"),
            Self::UploadCompleted => write!(f, "upload_completed"),
        }
    }
}

/// Set of tags a task reacts to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerSet {
    tags: BTreeSet<EventTag>,
}

impl TriggerSet {
    /// Create an empty trigger set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tag; returns false if it was already present
    pub fn insert(&mut self, tag: EventTag) -> bool {
        self.tags.insert(tag)
    }

    /// Remove a tag; returns false if it was not present
    pub fn remove(&mut self, tag: &EventTag) -> bool {
        self.tags.remove(tag)
    }

    /// Whether the tag is in the set
    #[must_use]
    pub fn contains(&self, tag: &EventTag) -> bool {
        self.tags.contains(tag)
    }

    /// Whether the event should trigger a check
    #[must_use]
    pub fn matches(&self, event: &PlatformEvent) -> bool {
        self.tags.contains(&event.tag())
    }

    /// Number of tags
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Iterate over the tags in order
    pub fn iter(&self) -> impl Iterator<Item = &EventTag> {
        self.tags.iter()
    }
}

impl FromIterator<EventTag> for TriggerSet {
    fn from_iter<I: IntoIterator<Item = EventTag>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}
