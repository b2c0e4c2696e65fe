//! Contract between the manifest synchronizer and the components it configures

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A component that reports status to the backend and accepts configuration
/// from the manifest.
///
/// Every [`PeriodicTask`](crate::PeriodicTask) implements this: its state is
/// the report, and a manifest subtree is deserialized into new parameters.
#[async_trait]
pub trait ManifestReceiver: Send + Sync {
    /// Name shown in the synchronizer's receiver summary
    fn receiver_name(&self) -> String;

    /// Current status document; `None` or an empty document means nothing to
    /// report
    async fn get_state(&self) -> Result<Option<Value>>;

    /// Apply a manifest subtree; returns false if it was rejected
    async fn parameters_updated(&self, document: &Value) -> bool;
}

/// Whether a status document has anything in it
#[must_use]
pub fn is_empty_document(document: &Value) -> bool {
    match document {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}
