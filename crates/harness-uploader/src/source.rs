//! Upload source contract
//!
//! A source owns a set of pending files. The multiplexer asks it to
//! `prepare()`, then pulls files with `next()` until it yields nothing, and
//! reports every transfer back through `complete()`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Priority of log capture sources, served first
pub const PRIORITY_LOGS: u32 = 0;
/// Priority of time-sensitive sources
pub const PRIORITY_HIGH: u32 = 1;
/// Priority of bulk sources, served last
pub const PRIORITY_LOW: u32 = 2;

/// One file handed to the multiplexer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UploadFile {
    /// Local file to send
    pub source_path: PathBuf,
    /// Name of the file on the backend
    pub destination_name: String,
    /// Backend namespace; the source's name when unset
    pub owner_namespace: Option<String>,
    /// Size in bytes when handed over
    pub length: u64,
}

impl UploadFile {
    /// Descriptor without an explicit namespace
    pub fn new(source_path: impl Into<PathBuf>, destination_name: impl Into<String>, length: u64) -> Self {
        Self {
            source_path: source_path.into(),
            destination_name: destination_name.into(),
            owner_namespace: None,
            length,
        }
    }

    /// Upload under `namespace` instead of the source's name
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.owner_namespace = Some(namespace.into());
        self
    }
}

/// Producer of files for the upload multiplexer
#[async_trait]
pub trait UploadSource: Send + Sync {
    /// Stable name, used as the namespace of files that do not set one
    fn name(&self) -> String;

    /// Refresh the pending set before a batch
    async fn prepare(&self);

    /// Whether any file is pending
    async fn has_next(&self) -> bool;

    /// Bytes pending, for progress reporting
    async fn bytes_available(&self) -> u64;

    /// Next file to send, or `None` when this source is drained for now
    async fn next(&self) -> Option<UploadFile>;

    /// Outcome of the transfer of `file`
    async fn complete(&self, file: &UploadFile, success: bool);
}
