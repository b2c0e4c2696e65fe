//! Harness Uploader - priority-multiplexed file upload
//!
//! This crate provides:
//! - The upload source contract and file descriptors
//! - A priority-ordered source registry
//! - The upload multiplexer task, gated on network and power
//! - A file relay source other components can hand files to

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod multiplexer;
pub mod params;
pub mod registry;
pub mod relay;
pub mod source;

pub use error::{Result, UploadError};
pub use multiplexer::{UploadMultiplexer, UploadTask, BATCH_CANCEL_WAIT, UPLOADER_TASK_NAME};
pub use params::{
    PowerPolicy, SourceSummary, UploaderParameters, UploaderStatus, DEFAULT_FAILURE_COUNT,
    DEFAULT_LOGGER_URL,
};
pub use registry::{SourceRecord, SourceRegistry};
pub use relay::{
    FileRelay, RelayParameters, RelayStatus, RelayTask, INBOX_DIR, RELAY_PATHS_KEY, RELAY_TASK_NAME,
};
pub use source::{UploadFile, UploadSource, PRIORITY_HIGH, PRIORITY_LOGS, PRIORITY_LOW};
