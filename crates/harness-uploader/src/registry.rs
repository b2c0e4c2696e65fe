//! Priority-ordered source registry

use std::sync::Arc;
use tracing::{error, warn};

use crate::params::SourceSummary;
use crate::source::UploadSource;

/// One registered source
#[derive(Clone)]
pub struct SourceRecord {
    /// The source
    pub source: Arc<dyn UploadSource>,
    /// Priority, lower first
    pub priority: u32,
    /// Name captured at registration
    pub name: String,
}

impl SourceRecord {
    fn is(&self, source: &Arc<dyn UploadSource>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.source), Arc::as_ptr(source))
    }

    /// Status view of this record
    pub fn summary(&self) -> SourceSummary {
        SourceSummary {
            name: self.name.clone(),
            priority: self.priority,
        }
    }
}

impl std::fmt::Debug for SourceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRecord")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Registered sources keyed by identity, plus a cached service order.
///
/// Equal priorities keep registration order.
#[derive(Debug, Default)]
pub struct SourceRegistry {
    records: Vec<SourceRecord>,
    ordered: Arc<Vec<SourceRecord>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `source`; returns false if it is already registered
    pub fn register(&mut self, source: Arc<dyn UploadSource>, priority: u32) -> bool {
        if self.records.iter().any(|record| record.is(&source)) {
            error!(source = %source.name(), "Duplicate upload source, ignoring");
            return false;
        }

        let name = source.name();
        self.records.push(SourceRecord {
            source,
            priority,
            name,
        });
        self.reorder();
        true
    }

    /// Remove `source`; returns false if it was not registered
    pub fn unregister(&mut self, source: &Arc<dyn UploadSource>) -> bool {
        let Some(index) = self.records.iter().position(|record| record.is(source)) else {
            warn!(source = %source.name(), "Unknown upload source");
            return false;
        };
        self.records.remove(index);
        self.reorder();
        true
    }

    fn reorder(&mut self) {
        let mut ordered = self.records.clone();
        ordered.sort_by_key(|record| record.priority);
        self.ordered = Arc::new(ordered);
    }

    /// Sources in service order
    pub fn ordered(&self) -> Arc<Vec<SourceRecord>> {
        Arc::clone(&self.ordered)
    }

    /// Status view of the service order
    pub fn summaries(&self) -> Vec<SourceSummary> {
        self.ordered.iter().map(SourceRecord::summary).collect()
    }

    /// Number of registered sources
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no source is registered
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::UploadFile;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl UploadSource for Named {
        fn name(&self) -> String {
            self.0.to_string()
        }
        async fn prepare(&self) {}
        async fn has_next(&self) -> bool {
            false
        }
        async fn bytes_available(&self) -> u64 {
            0
        }
        async fn next(&self) -> Option<UploadFile> {
            None
        }
        async fn complete(&self, _file: &UploadFile, _success: bool) {}
    }

    fn names(registry: &SourceRegistry) -> Vec<String> {
        registry.ordered().iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn test_ordered_by_priority_then_registration() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(Named("bulk")), 2);
        registry.register(Arc::new(Named("logs")), 0);
        registry.register(Arc::new(Named("bulk-2")), 2);
        registry.register(Arc::new(Named("urgent")), 1);

        assert_eq!(names(&registry), vec!["logs", "urgent", "bulk", "bulk-2"]);
        assert_eq!(registry.summaries()[0].priority, 0);
    }

    #[test]
    fn test_identity_not_name() {
        let mut registry = SourceRegistry::new();
        let first: Arc<dyn UploadSource> = Arc::new(Named("same"));
        let second: Arc<dyn UploadSource> = Arc::new(Named("same"));

        assert!(registry.register(first.clone(), 1));
        assert!(!registry.register(first.clone(), 0));
        assert!(registry.register(second.clone(), 1));
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(&first));
        assert!(!registry.unregister(&first));
        assert_eq!(registry.len(), 1);
        assert!(std::ptr::addr_eq(
            Arc::as_ptr(&registry.ordered()[0].source),
            Arc::as_ptr(&second)
        ));
    }
}
