//! Single-worker FIFO queue backing each task
//!
//! Jobs run one at a time in submission order, which is what keeps checks of
//! the same task from overlapping.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Unit of work queued on a task
pub(crate) type Job = BoxFuture<'static, ()>;

pub(crate) struct CheckWorker {
    sender: mpsc::UnboundedSender<Job>,
    handle: JoinHandle<()>,
}

impl CheckWorker {
    /// Spawn the worker loop for the named task
    pub(crate) fn spawn(name: String) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        let handle = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                    error!(task = %name, "Queued job panicked");
                }
            }
            debug!(task = %name, "Worker drained");
        });

        Self { sender, handle }
    }

    /// Queue a job; false once the worker is shut down
    pub(crate) fn submit(&self, job: Job) -> bool {
        self.sender.send(job).is_ok()
    }

    /// Close the queue and wait for queued jobs to finish.
    ///
    /// Returns false if the wait timed out and the worker was aborted.
    pub(crate) async fn shutdown(self, name: &str, timeout: Duration) -> bool {
        let Self { sender, mut handle } = self;
        drop(sender);

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    task = %name,
                    timeout_secs = timeout.as_secs(),
                    "Timed out waiting for running check, aborting"
                );
                handle.abort();
                false
            }
        }
    }
}
