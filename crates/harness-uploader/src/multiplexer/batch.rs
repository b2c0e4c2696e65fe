use harness_core::{join_url, DeviceIdentity, PeriodicTask, TransferOptions};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::UploadTask;
use crate::registry::SourceRecord;
use crate::source::UploadFile;

/// How a single batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchEnd {
    /// Every source yielded nothing more
    Drained { uploaded: usize },
    /// Network or power went away, or the task stopped
    Gated,
    /// Upload was disabled
    Cancelled,
    /// Too many failed transfers
    FailureLimit,
}

/// Run batches back to back while they make progress and files remain.
///
/// Holds the wake lock for the whole run.
pub(crate) async fn run_batches(task: PeriodicTask<UploadTask>, cancel: CancellationToken) {
    let _wake = task.platform().wake_lock.acquire();

    loop {
        let batch_id = Uuid::new_v4();
        let end = run_batch(&task, &cancel, batch_id).await;
        debug!(batch = %batch_id, ?end, "Upload batch ended");

        match end {
            BatchEnd::Drained { uploaded } if uploaded > 0 && has_pending(&task).await => {
                debug!(batch = %batch_id, "Files still waiting, starting another batch");
            }
            BatchEnd::Drained { .. } => {
                task.behavior().finish_cycle(&task);
                break;
            }
            BatchEnd::FailureLimit => {
                info!(batch = %batch_id, "Not rescheduling upload after repeated failures");
                task.behavior().finish_cycle(&task);
                break;
            }
            BatchEnd::Gated | BatchEnd::Cancelled => break,
        }
    }
}

async fn has_pending(task: &PeriodicTask<UploadTask>) -> bool {
    for record in task.behavior().snapshot().iter() {
        if record.source.has_next().await {
            return true;
        }
    }
    false
}

async fn run_batch(
    task: &PeriodicTask<UploadTask>,
    cancel: &CancellationToken,
    batch_id: Uuid,
) -> BatchEnd {
    let behavior = task.behavior();
    let sources = behavior.snapshot();

    let mut total_bytes = 0u64;
    for record in sources.iter() {
        record.source.prepare().await;
        total_bytes += record.source.bytes_available().await;
    }
    task.update_status(|status| {
        status.batch_total_bytes = total_bytes;
        status.batch_uploaded_bytes = 0;
    });
    info!(
        batch = %batch_id,
        sources = sources.len(),
        total_bytes,
        "Starting upload loop"
    );

    let mut failures = 0u32;
    let mut uploaded = 0usize;

    for record in sources.iter() {
        loop {
            let parameters = task.parameters();
            if cancel.is_cancelled() {
                debug!(batch = %batch_id, "Upload batch cancelled");
                return BatchEnd::Cancelled;
            }
            if !behavior.can_upload(task, &parameters) {
                debug!(batch = %batch_id, "Upload gate closed, ending batch early");
                return BatchEnd::Gated;
            }

            let Some(file) = record.source.next().await else {
                break;
            };

            let url = upload_url(
                &task.platform().identity,
                &parameters.logger_url,
                record,
                &file,
            );
            let options = TransferOptions::new(
                Duration::from_secs(parameters.connection_timeout_secs),
                parameters.compress,
            );
            debug!(batch = %batch_id, url = %url, bytes = file.length, "Uploading file");

            let sent = match task
                .platform()
                .transport
                .upload_file(&url, &file.source_path, options)
                .await
            {
                Ok(200) => true,
                Ok(status) => {
                    warn!(batch = %batch_id, url = %url, status, "Upload rejected");
                    false
                }
                Err(e) => {
                    warn!(batch = %batch_id, url = %url, error = %e, "Upload failed");
                    false
                }
            };

            record.source.complete(&file, sent).await;
            if sent {
                uploaded += 1;
                behavior.add_uploaded(task, file.length);
                continue;
            }

            failures += 1;
            if failures > parameters.failure_count {
                warn!(batch = %batch_id, failures, "Too many upload failures, abandoning batch");
                return BatchEnd::FailureLimit;
            }
        }
    }

    BatchEnd::Drained { uploaded }
}

/// `<logger_url>/<version>/<device>/<namespace>/<destination>`
fn upload_url(
    identity: &DeviceIdentity,
    logger_url: &str,
    record: &SourceRecord,
    file: &UploadFile,
) -> String {
    let namespace = file.owner_namespace.as_deref().unwrap_or(&record.name);
    join_url(
        logger_url,
        &[
            &identity.version_name,
            &identity.device_id,
            namespace,
            &file.destination_name,
        ],
    )
}
