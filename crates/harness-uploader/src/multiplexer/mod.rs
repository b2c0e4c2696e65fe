//! Upload multiplexer
//!
//! A periodic task without a managed timer. Power and connectivity
//! transitions trigger a check, which enables or disables uploading:
//! - enabled: a repeating timer at the check interval and one batch job
//!   draining every source in priority order
//! - disabled: no timer, the running batch is cancelled
//!
//! The connectivity trigger is only subscribed while the power policy holds.

mod batch;


use async_trait::async_trait;
use chrono::Utc;
use harness_core::{
    EventTag, ManifestReceiver, Parameters, PeriodicTask, Platform, TaskBehavior, TaskOptions,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::params::{SourceSummary, UploaderParameters, UploaderStatus};
use crate::registry::{SourceRecord, SourceRegistry};
use crate::source::UploadSource;

/// Name of the multiplexer task
pub const UPLOADER_TASK_NAME: &str = "uploader";

/// How long disabling waits for the running batch to wind down
pub const BATCH_CANCEL_WAIT: Duration = Duration::from_secs(5);

struct BatchJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct UploadControl {
    enabled: bool,
    batch: Option<BatchJob>,
}

/// Task behavior of the upload multiplexer
#[derive(Default)]
pub struct UploadTask {
    /// Parameters used until the manifest delivers others
    defaults: UploaderParameters,
    registry: Mutex<SourceRegistry>,
    control: tokio::sync::Mutex<UploadControl>,
    /// Bytes sent since the last completed cycle
    uploaded_bytes: AtomicU64,
}

impl UploadTask {
    /// Create a task with no sources
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a task whose initial parameters are `defaults`
    pub fn with_defaults(defaults: UploaderParameters) -> Self {
        Self {
            defaults,
            ..Self::default()
        }
    }

    fn registry(&self) -> MutexGuard<'_, SourceRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<SourceRecord>> {
        self.registry().ordered()
    }

    /// Upload gate: task started, network up and power policy satisfied.
    ///
    /// Records what it saw in the status and keeps the connectivity trigger
    /// subscribed only while power holds.
    pub(crate) fn can_upload(
        &self,
        task: &PeriodicTask<Self>,
        parameters: &UploaderParameters,
    ) -> bool {
        if !task.is_started() {
            return false;
        }

        let device = &task.platform().device;
        let network = device.is_connected();
        let power = parameters.power_policy.is_satisfied(device.power_status());
        task.update_status(|status| {
            status.network = network;
            status.power = power;
        });

        if power {
            task.add_trigger(EventTag::ConnectivityChanged);
        } else {
            task.remove_trigger(&EventTag::ConnectivityChanged);
        }

        debug!(network, power, policy = ?parameters.power_policy, "Upload gate");
        network && power
    }

    async fn enable_upload(&self, task: &PeriodicTask<Self>, parameters: &UploaderParameters) {
        let mut control = self.control.lock().await;
        if !control.enabled {
            task.repeating(parameters.check_interval());
        }
        control.enabled = true;

        if let Some(batch) = control.batch.as_mut() {
            if batch.cancel.is_cancelled() && !batch.handle.is_finished() {
                debug!("Waiting for cancelled upload batch");
                let _ = tokio::time::timeout(BATCH_CANCEL_WAIT, &mut batch.handle).await;
            }
            if !batch.handle.is_finished() {
                debug!("Not restarting running upload batch");
                return;
            }
        }

        info!("Starting upload batch");
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(batch::run_batches(task.clone(), cancel.clone()));
        control.batch = Some(BatchJob { cancel, handle });
    }

    async fn disable_upload(&self, task: &PeriodicTask<Self>) {
        let mut control = self.control.lock().await;
        if control.enabled {
            task.cancel_timer();
        }
        control.enabled = false;

        let Some(mut batch) = control.batch.take() else {
            return;
        };
        if batch.handle.is_finished() {
            return;
        }

        info!("Cancelling running upload batch");
        batch.cancel.cancel();
        if tokio::time::timeout(BATCH_CANCEL_WAIT, &mut batch.handle)
            .await
            .is_err()
        {
            warn!("Upload batch still finishing its transfer");
            control.batch = Some(batch);
        }
    }

    pub(crate) fn add_uploaded(&self, task: &PeriodicTask<Self>, bytes: u64) {
        self.uploaded_bytes.fetch_add(bytes, Ordering::SeqCst);
        task.update_status(|status| status.batch_uploaded_bytes += bytes);
    }

    /// Stamp the end of an upload cycle and restart the byte count
    pub(crate) fn finish_cycle(&self, task: &PeriodicTask<Self>) {
        let uploaded = self.uploaded_bytes.swap(0, Ordering::SeqCst);
        let now = Utc::now();
        task.update_status(|status| {
            status.last_upload = now;
            status.uploaded_bytes = uploaded;
        });
        info!(uploaded_bytes = uploaded, "Upload cycle complete");
    }

    /// Whether the running batch job, if any, is still going
    pub(crate) async fn batch_running(&self) -> bool {
        self.control
            .lock()
            .await
            .batch
            .as_ref()
            .is_some_and(|batch| !batch.handle.is_finished())
    }
}

#[async_trait]
impl TaskBehavior for UploadTask {
    type Params = UploaderParameters;
    type Status = UploaderStatus;

    fn new_parameters(&self) -> UploaderParameters {
        self.defaults.clone()
    }

    async fn check(
        &self,
        task: &PeriodicTask<Self>,
        parameters: Arc<UploaderParameters>,
    ) -> harness_core::Result<()> {
        if self.can_upload(task, &parameters) {
            debug!("Enabling upload");
            self.enable_upload(task, &parameters).await;
        } else {
            debug!("Disabling upload");
            self.disable_upload(task).await;
        }
        Ok(())
    }

    async fn on_stop(&self, task: &PeriodicTask<Self>) {
        self.disable_upload(task).await;
    }
}

/// Handle to the upload multiplexer task
#[derive(Clone, Debug)]
pub struct UploadMultiplexer {
    task: PeriodicTask<UploadTask>,
}

impl UploadMultiplexer {
    /// Create a stopped multiplexer triggered by power and connectivity events
    pub fn new(platform: Platform) -> Self {
        Self::with_defaults(platform, UploaderParameters::default())
    }

    /// Create a stopped multiplexer with its own initial parameters
    pub fn with_defaults(platform: Platform, defaults: UploaderParameters) -> Self {
        let options = TaskOptions::new()
            .with_periodic_timer(false)
            .with_trigger(EventTag::PowerConnected)
            .with_trigger(EventTag::PowerDisconnected)
            .with_trigger(EventTag::ConnectivityChanged);
        Self {
            task: PeriodicTask::with_options(
                UPLOADER_TASK_NAME,
                UploadTask::with_defaults(defaults),
                platform,
                options,
            ),
        }
    }

    /// Underlying periodic task
    pub fn task(&self) -> &PeriodicTask<UploadTask> {
        &self.task
    }

    /// The multiplexer as a manifest receiver
    pub fn as_receiver(&self) -> Arc<dyn ManifestReceiver> {
        Arc::new(self.task.clone())
    }

    /// Start the multiplexer task
    pub async fn start(&self) {
        self.task.start().await;
    }

    /// Stop the multiplexer task, cancelling any running batch
    pub async fn stop(&self) {
        self.task.stop().await;
    }

    /// Register `source` at `priority` (lower first) and schedule a check.
    ///
    /// Returns false if the same source is already registered.
    pub fn register_source(&self, source: Arc<dyn UploadSource>, priority: u32) -> bool {
        let name = source.name();
        let summaries = {
            let mut registry = self.task.behavior().registry();
            if !registry.register(source, priority) {
                return false;
            }
            registry.summaries()
        };
        self.task
            .update_status(|status| status.ordered_sources = summaries);
        info!(source = %name, priority, "Registered upload source");

        self.task.schedule_check();
        true
    }

    /// Remove `source`; returns false if it was not registered
    pub fn unregister_source(&self, source: &Arc<dyn UploadSource>) -> bool {
        let summaries = {
            let mut registry = self.task.behavior().registry();
            if !registry.unregister(source) {
                return false;
            }
            registry.summaries()
        };
        self.task
            .update_status(|status| status.ordered_sources = summaries);
        info!(source = %source.name(), "Unregistered upload source");
        true
    }

    /// Registered sources in service order
    pub fn ordered_sources(&self) -> Vec<SourceSummary> {
        self.task.behavior().registry().summaries()
    }

    /// Whether a batch job is currently running
    pub async fn is_uploading(&self) -> bool {
        self.task.behavior().batch_running().await
    }
}
