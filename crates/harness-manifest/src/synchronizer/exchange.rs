use chrono::Utc;
use harness_core::{hash_hex, join_url, PeriodicTask, TransferOptions};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ManifestTask;
use crate::error::{ManifestError, Result};
use crate::params::CONNECTION_TIMEOUT_SECS;

/// Result of one manifest exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// No network; nothing was attempted
    Offline,
    /// The exchange failed
    Failed,
    /// The downloaded manifest matches the cached one
    Unchanged,
    /// A different manifest was downloaded
    Changed,
}

impl ExchangeOutcome {
    /// Combine the primary and fallback outcomes of one cycle
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Failed => 0,
            Self::Offline => 1,
            Self::Unchanged => 2,
            Self::Changed => 3,
        }
    }
}

impl ManifestTask {
    /// Upload the status document to `base_url` and cache the manifest it
    /// answers with.
    ///
    /// Failures against the primary endpoint count towards the fallback
    /// threshold; a primary success resets the count.
    pub(crate) async fn exchange_manifest(
        &self,
        task: &PeriodicTask<Self>,
        base_url: &str,
        fallback: bool,
    ) -> ExchangeOutcome {
        let platform = task.platform();
        if !platform.device.is_connected() {
            debug!("Network not connected, skipping manifest exchange");
            return ExchangeOutcome::Offline;
        }

        let identity = &platform.identity;
        let url = join_url(base_url, &[&identity.version_name, &identity.device_id]);
        let downloaded = self.download(task, &url).await;

        let mut exchange = self.exchange.lock().await;
        let hash = match downloaded {
            Ok(hash) => hash,
            Err(e) => {
                if !fallback {
                    exchange.fallback_count += 1;
                }
                let failures = exchange.fallback_count;
                warn!(url = %url, error = %e, failures, "Manifest exchange failed");
                task.update_status(|status| status.fallback_count = failures);
                return ExchangeOutcome::Failed;
            }
        };

        if !fallback {
            exchange.fallback_count = 0;
        }
        let changed = exchange.hash.as_deref() != Some(hash.as_str());
        exchange.hash = Some(hash);
        if changed {
            exchange.parsed = None;
        }

        let failures = exchange.fallback_count;
        let now = Utc::now();
        task.update_status(|status| {
            status.downloaded_manifest = now;
            status.fallback_count = failures;
            if changed {
                status.new_manifest = now;
            }
        });

        if changed {
            info!(url = %url, "Downloaded new manifest");
            ExchangeOutcome::Changed
        } else {
            debug!(url = %url, "Manifest unchanged");
            ExchangeOutcome::Unchanged
        }
    }

    async fn download(&self, task: &PeriodicTask<Self>, url: &str) -> Result<String> {
        let body = self.files.read_outbound().await;
        let options = TransferOptions::new(
            Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            self.settings.compress,
        );

        let bytes = task
            .platform()
            .transport
            .exchange(url, body, options)
            .await?;
        if bytes.is_empty() {
            return Err(ManifestError::EmptyManifest(url.to_string()));
        }

        self.files.store_download(&bytes).await?;
        Ok(hash_hex(&bytes))
    }

    /// Consecutive primary endpoint failures
    pub(crate) async fn fallback_count(&self) -> u32 {
        self.exchange.lock().await.fallback_count
    }
}
