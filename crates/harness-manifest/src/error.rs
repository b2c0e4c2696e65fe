//! Manifest synchronizer error types

use harness_core::{TaskError, TransportError};
use thiserror::Error;

/// Result type for manifest operations
pub type Result<T> = std::result::Result<T, ManifestError>;

/// Manifest synchronizer error types
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Manifest cache could not be read or written
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Manifest or status document is not valid JSON
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Exchange with the backend failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The backend answered with an empty manifest
    #[error("empty manifest from {0}")]
    EmptyManifest(String),
    /// Task engine error
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl From<ManifestError> for TaskError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::Task(inner) => inner,
            ManifestError::Io(inner) => TaskError::Io(inner),
            ManifestError::Serialization(inner) => TaskError::Serialization(inner),
            ManifestError::Transport(inner) => TaskError::Transport(inner),
            other => TaskError::Check(other.to_string()),
        }
    }
}
