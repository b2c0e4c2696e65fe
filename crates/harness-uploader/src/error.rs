//! Upload pipeline error types

use harness_core::TaskError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for upload operations
pub type Result<T> = std::result::Result<T, UploadError>;

/// Upload pipeline error types
#[derive(Debug, Error)]
pub enum UploadError {
    /// Local file could not be inspected
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Pending file list could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// File is not eligible for upload
    #[error("rejected {path}: {reason}")]
    Rejected {
        /// Offending path
        path: PathBuf,
        /// Why it was rejected
        reason: String,
    },
    /// Task engine error
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl UploadError {
    pub(crate) fn rejected(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<UploadError> for TaskError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Task(inner) => inner,
            UploadError::Io(inner) => TaskError::Io(inner),
            UploadError::Serialization(inner) => TaskError::Serialization(inner),
            other => TaskError::Check(other.to_string()),
        }
    }
}
