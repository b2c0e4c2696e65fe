//! Manifest synchronizer
//!
//! Each check collects the state of every registered receiver into one status
//! document, exchanges it with the backend for the current manifest, and hands
//! each receiver its entry (`/manifest/<key>`) when that entry changed.

mod distribute;
mod exchange;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harness_core::{ManifestReceiver, PeriodicTask, Platform, TaskBehavior};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::ManifestFiles;
use crate::error::Result;
use crate::params::{ManifestParameters, ManifestSettings, ManifestStatus, ReceiverSummary};

pub use exchange::ExchangeOutcome;

/// Name of the synchronizer task and its own receiver key
pub const MANIFEST_TASK_NAME: &str = "manifest";

pub(crate) struct ReceiverEntry {
    receiver: Arc<dyn ManifestReceiver>,
    /// Entry last handed to the receiver
    node: Option<Value>,
    update_time: DateTime<Utc>,
}

#[derive(Default)]
pub(crate) struct ExchangeState {
    hash: Option<String>,
    fallback_count: u32,
    parsed: Option<Arc<Value>>,
}

/// Task behavior of the manifest synchronizer
pub struct ManifestTask {
    settings: ManifestSettings,
    files: ManifestFiles,
    receivers: Mutex<BTreeMap<String, ReceiverEntry>>,
    exchange: Mutex<ExchangeState>,
}

impl ManifestTask {
    /// Prepare the cache directory and pick up the hash of a cached manifest
    pub async fn new(settings: ManifestSettings) -> Result<Self> {
        tokio::fs::create_dir_all(&settings.data_dir).await?;
        let files = ManifestFiles::new(&settings.data_dir);
        let hash = files.server_hash().await?;
        if hash.is_some() {
            debug!(path = %files.server_path().display(), "Found cached manifest");
        }

        Ok(Self {
            settings,
            files,
            receivers: Mutex::new(BTreeMap::new()),
            exchange: Mutex::new(ExchangeState {
                hash,
                ..Default::default()
            }),
        })
    }

    /// Local settings
    pub fn settings(&self) -> &ManifestSettings {
        &self.settings
    }

    /// Cached documents
    pub fn files(&self) -> &ManifestFiles {
        &self.files
    }

    /// Collect every receiver's state into the outbound status document.
    ///
    /// Without receivers the stale document is deleted instead.
    async fn collect_state(&self, task: &PeriodicTask<Self>) -> Result<()> {
        let receivers = self.receivers.lock().await;
        if receivers.is_empty() {
            warn!("No manifest receivers registered, skipping state collection");
            if self.files.remove_outbound().await? {
                debug!("Removed stale status document");
            }
            return Ok(());
        }

        let mut document = serde_json::Map::new();
        for (key, entry) in receivers.iter() {
            if let Some(state) = distribute::collect_one(key, entry).await {
                document.insert(key.clone(), state);
            }
        }
        drop(receivers);

        debug!(reports = document.len(), "Collected receiver state");
        self.files.write_outbound(&Value::Object(document)).await?;
        let now = Utc::now();
        task.update_status(|status| status.state_collected = now);
        Ok(())
    }

    async fn register(
        &self,
        task: &PeriodicTask<Self>,
        key: String,
        receiver: Arc<dyn ManifestReceiver>,
    ) -> bool {
        let mut receivers = self.receivers.lock().await;
        if receivers.contains_key(&key) {
            error!(key = %key, "Duplicate manifest receiver key");
            return false;
        }

        let summary = ReceiverSummary {
            receiver_name: receiver.receiver_name(),
            update_time: DateTime::default(),
        };
        receivers.insert(
            key.clone(),
            ReceiverEntry {
                receiver,
                node: None,
                update_time: DateTime::default(),
            },
        );
        task.update_status(|status| {
            status.receivers.insert(key.clone(), summary);
        });
        info!(key = %key, "Registered manifest receiver");
        true
    }

    async fn unregister(&self, task: &PeriodicTask<Self>, key: &str) -> bool {
        let mut receivers = self.receivers.lock().await;
        if receivers.remove(key).is_none() {
            warn!(key = %key, "Unknown manifest receiver key");
            return false;
        }
        task.update_status(|status| {
            status.receivers.remove(key);
        });
        info!(key = %key, "Discarded manifest receiver");
        true
    }
}

#[async_trait]
impl TaskBehavior for ManifestTask {
    type Params = ManifestParameters;
    type Status = ManifestStatus;

    fn new_parameters(&self) -> ManifestParameters {
        ManifestParameters {
            manifest_url: self.settings.manifest_url.clone(),
            ..Default::default()
        }
    }

    async fn check(
        &self,
        task: &PeriodicTask<Self>,
        parameters: Arc<ManifestParameters>,
    ) -> harness_core::Result<()> {
        if let Err(e) = self.collect_state(task).await {
            error!(error = %e, "Problem collecting state");
        }

        let mut outcome = self
            .exchange_manifest(task, &parameters.manifest_url, false)
            .await;

        let failures = self.fallback_count().await;
        if failures > self.settings.fallback_threshold {
            warn!(failures, "Primary manifest endpoint failing, trying fallback");
            let fallback = self
                .exchange_manifest(task, &self.settings.fallback_url, true)
                .await;
            outcome = outcome.merge(fallback);
        }

        match outcome {
            ExchangeOutcome::Changed => self.distribute(task, &parameters, true).await?,
            ExchangeOutcome::Unchanged | ExchangeOutcome::Offline if !parameters.compare_files => {
                self.distribute(task, &parameters, false).await?
            }
            ExchangeOutcome::Failed => debug!("Manifest exchange failed, not distributing"),
            ExchangeOutcome::Unchanged | ExchangeOutcome::Offline => {
                debug!(?outcome, "Nothing to distribute")
            }
        }
        Ok(())
    }

    async fn refresh_status(&self, task: &PeriodicTask<Self>) {
        let identity = &task.platform().identity;
        let now = Utc::now();
        task.update_status(|status| {
            status.now = now;
            status.version_name = identity.version_name.clone();
            status.version_code = identity.version_code.clone();
        });
    }
}

/// Handle to the manifest synchronizer task
#[derive(Clone, Debug)]
pub struct ManifestSynchronizer {
    task: PeriodicTask<ManifestTask>,
}

impl ManifestSynchronizer {
    /// Create a stopped synchronizer
    pub async fn new(settings: ManifestSettings, platform: Platform) -> Result<Self> {
        let behavior = ManifestTask::new(settings).await?;
        Ok(Self {
            task: PeriodicTask::new(MANIFEST_TASK_NAME, behavior, platform),
        })
    }

    /// Underlying periodic task
    pub fn task(&self) -> &PeriodicTask<ManifestTask> {
        &self.task
    }

    /// The synchronizer as a receiver of its own manifest entry
    pub fn as_receiver(&self) -> Arc<dyn ManifestReceiver> {
        Arc::new(self.task.clone())
    }

    /// Start the synchronizer task
    pub async fn start(&self) {
        self.task.start().await;
    }

    /// Stop the synchronizer task
    pub async fn stop(&self) {
        self.task.stop().await;
    }

    /// Register `receiver` for the manifest entry under `key`.
    ///
    /// Duplicate keys are rejected. On success one distribution pass runs on
    /// the synchronizer's queue, or inline if the task is stopped.
    pub async fn receive_manifest_updates(
        &self,
        receiver: Arc<dyn ManifestReceiver>,
        key: impl Into<String>,
    ) -> bool {
        let behavior = self.task.behavior();
        if !behavior.register(&self.task, key.into(), receiver).await {
            return false;
        }

        let task = self.task.clone();
        let queued = self
            .task
            .enqueue(async move { task.behavior().distribute_current(&task).await });
        if !queued {
            behavior.distribute_current(&self.task).await;
        }
        true
    }

    /// Stop handing manifest entries to the receiver under `key`
    pub async fn discard_manifest_updates(&self, key: &str) -> bool {
        self.task.behavior().unregister(&self.task, key).await
    }

    /// Registered receiver keys, in order
    pub async fn receiver_keys(&self) -> Vec<String> {
        self.task
            .behavior()
            .receivers
            .lock()
            .await
            .keys()
            .cloned()
            .collect()
    }

    /// Consecutive primary endpoint failures
    pub async fn fallback_count(&self) -> u32 {
        self.task.behavior().fallback_count().await
    }
}
