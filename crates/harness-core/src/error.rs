//! Error types for the task engine and platform services

use thiserror::Error;

/// Result type for task engine operations
pub type Result<T> = std::result::Result<T, TaskError>;

/// Task engine error types
#[derive(Debug, Error)]
pub enum TaskError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Network transfer error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Check failed in a task-specific way
    #[error("check failed: {0}")]
    Check(String),
}

/// Errors raised by a [`Transport`](crate::platform::Transport)
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request could not be sent or the response could not be read
    #[error("request to {url} failed: {source}")]
    Request {
        /// Target URL
        url: String,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },
    /// The server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status {
        /// Target URL
        url: String,
        /// HTTP status code
        status: u16,
    },
    /// Reading or compressing a local file failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
