use chrono::Utc;
use futures::FutureExt;
use harness_core::{is_empty_document, PeriodicTask};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::{ManifestTask, ReceiverEntry};
use crate::cache::manifest_pointer;
use crate::error::Result;
use crate::params::{ManifestParameters, ReceiverSummary};

/// State of one receiver, or `None` if it has nothing to report or failed
pub(super) async fn collect_one(key: &str, entry: &ReceiverEntry) -> Option<Value> {
    match AssertUnwindSafe(entry.receiver.get_state())
        .catch_unwind()
        .await
    {
        Ok(Ok(Some(state))) if !is_empty_document(&state) => Some(state),
        Ok(Ok(_)) => {
            debug!(key = %key, "Receiver has nothing to report");
            None
        }
        Ok(Err(e)) => {
            warn!(key = %key, error = %e, "Problem collecting receiver state");
            None
        }
        Err(_) => {
            error!(key = %key, "Receiver panicked while reporting state");
            None
        }
    }
}

impl ManifestTask {
    /// Hand each receiver its manifest entry where it changed.
    ///
    /// `reparse` drops the cached parse of the manifest first.
    pub(crate) async fn distribute(
        &self,
        task: &PeriodicTask<Self>,
        parameters: &ManifestParameters,
        reparse: bool,
    ) -> Result<()> {
        let Some(manifest) = self.parsed_manifest(reparse).await? else {
            debug!("No manifest downloaded yet, nothing to distribute");
            return Ok(());
        };

        let mut receivers = self.receivers.lock().await;
        let mut updated = 0usize;
        for (key, entry) in receivers.iter_mut() {
            if offer(task, key, entry, &manifest, parameters.compare_nodes).await {
                updated += 1;
            }
        }

        debug!(updated, receivers = receivers.len(), "Distributed manifest");
        Ok(())
    }

    /// Distribution pass with the parameters currently in effect
    pub(crate) async fn distribute_current(&self, task: &PeriodicTask<Self>) {
        let parameters = task.parameters();
        if let Err(e) = self.distribute(task, &parameters, false).await {
            warn!(error = %e, "Unable to distribute manifest");
        }
    }

    async fn parsed_manifest(&self, reparse: bool) -> Result<Option<Arc<Value>>> {
        let mut exchange = self.exchange.lock().await;
        if !reparse {
            if let Some(parsed) = &exchange.parsed {
                return Ok(Some(Arc::clone(parsed)));
            }
        }

        let parsed = self.files.parse_server().await?.map(Arc::new);
        exchange.parsed = parsed.clone();
        Ok(parsed)
    }
}

/// Offer the receiver its entry; returns whether it was handed over
async fn offer(
    task: &PeriodicTask<ManifestTask>,
    key: &str,
    entry: &mut ReceiverEntry,
    manifest: &Value,
    compare_nodes: bool,
) -> bool {
    let Some(node) = manifest.pointer(&manifest_pointer(key)) else {
        warn!(key = %key, "No manifest entry for receiver");
        return false;
    };

    let reason = match &entry.node {
        None => "first distribution",
        Some(_) if !compare_nodes => "forced",
        Some(previous) if previous != node => "changed",
        Some(_) => {
            debug!(key = %key, "Manifest entry unchanged");
            return false;
        }
    };

    debug!(key = %key, reason, "Handing over manifest entry");
    entry.node = Some(node.clone());
    entry.update_time = Utc::now();

    match AssertUnwindSafe(entry.receiver.parameters_updated(node))
        .catch_unwind()
        .await
    {
        Ok(true) => {}
        Ok(false) => warn!(key = %key, "Receiver rejected manifest entry"),
        Err(_) => error!(key = %key, "Receiver panicked applying manifest entry"),
    }

    let summary = ReceiverSummary {
        receiver_name: entry.receiver.receiver_name(),
        update_time: entry.update_time,
    };
    task.update_status(|status| {
        status.receivers.insert(key.to_string(), summary);
    });
    true
}
