//! Periodic task engine
//!
//! A [`PeriodicTask`] owns one [`TaskBehavior`] and gives it:
//! - a `Stopped -> Started -> Stopped` lifecycle
//! - persisted parameters, restored on start
//! - a single-worker queue so checks never overlap
//! - a trigger set subscribed to the event bus while started
//! - one repeating or one-shot timer
//!
//! The handle is cheap to clone; all clones drive the same task.

mod timer;
mod worker;


pub use timer::MIN_TIMER_INTERVAL;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::event_bus::{EventTag, TriggerSet};
use crate::params::{Parameters, TaskState};
use crate::platform::Platform;
use crate::receiver::ManifestReceiver;
use timer::{TaskTimer, TimerMode};
use worker::CheckWorker;

/// How long `stop()` waits for queued checks to finish
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Task-specific part of a periodic task
#[async_trait]
pub trait TaskBehavior: Send + Sync + Sized + 'static {
    /// Configuration record
    type Params: Parameters;
    /// Task-specific status reported next to the lifecycle timestamps
    type Status: Serialize + Clone + Default + Debug + Send + Sync + 'static;

    /// Parameters used when nothing valid was persisted
    fn new_parameters(&self) -> Self::Params;

    /// Initial status record
    fn new_status(&self) -> Self::Status {
        Self::Status::default()
    }

    /// Do one round of work. Runs on the task's worker, never concurrently
    /// with another check of the same task.
    async fn check(&self, task: &PeriodicTask<Self>, parameters: Arc<Self::Params>) -> Result<()>;

    /// Bring the status up to date before it is reported
    async fn refresh_status(&self, _task: &PeriodicTask<Self>) {}

    /// Called at the start of `stop()`, while the task is still started
    async fn on_stop(&self, _task: &PeriodicTask<Self>) {}
}

/// Construction options for a [`PeriodicTask`]
#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// Re-arm a repeating timer at the check interval whenever parameters
    /// are applied
    pub periodic_timer: bool,
    /// Bounded wait for in-flight checks during `stop()`
    pub drain_timeout: Duration,
    /// Extra trigger tags besides the task's own timer tag
    pub triggers: Vec<EventTag>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            periodic_timer: true,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            triggers: Vec::new(),
        }
    }
}

impl TaskOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the repeating timer managed by parameter updates
    pub fn with_periodic_timer(mut self, enabled: bool) -> Self {
        self.periodic_timer = enabled;
        self
    }

    /// Set the drain timeout used by `stop()`
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Add an initial trigger tag
    pub fn with_trigger(mut self, tag: EventTag) -> Self {
        self.triggers.push(tag);
        self
    }
}

/// Handle to a periodic task
pub struct PeriodicTask<B: TaskBehavior> {
    inner: Arc<TaskInner<B>>,
}

struct TaskInner<B: TaskBehavior> {
    name: String,
    behavior: B,
    platform: Platform,
    options: TaskOptions,
    parameters: RwLock<Option<Arc<B::Params>>>,
    state: Mutex<TaskState<B::Params, B::Status>>,
    /// Serializes parameter replacement with timer re-arm
    update_lock: tokio::sync::Mutex<()>,
    /// Serializes start and stop
    lifecycle: tokio::sync::Mutex<()>,
    timer: Mutex<TaskTimer>,
    subscription: Mutex<Subscription>,
    worker: Mutex<Option<CheckWorker>>,
    started: AtomicBool,
}

struct Subscription {
    triggers: TriggerSet,
    listener: Option<CancellationToken>,
}

impl<B: TaskBehavior> Drop for TaskInner<B> {
    /// The timer and the trigger listener outlive a task that was never
    /// stopped unless cancelled here.
    fn drop(&mut self) {
        let armed = self
            .timer
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .cancel();
        let listener = self
            .subscription
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .listener
            .take();
        if let Some(listener) = &listener {
            listener.cancel();
        }
        if armed || listener.is_some() {
            debug!(task = %self.name, "Dropped running task");
        }
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<B: TaskBehavior> Clone for PeriodicTask<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: TaskBehavior> Debug for PeriodicTask<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.inner.name)
            .field("started", &self.is_started())
            .finish()
    }
}

impl<B: TaskBehavior> PeriodicTask<B> {
    /// Create a stopped task with default options
    pub fn new(name: impl Into<String>, behavior: B, platform: Platform) -> Self {
        Self::with_options(name, behavior, platform, TaskOptions::default())
    }

    /// Create a stopped task
    pub fn with_options(
        name: impl Into<String>,
        behavior: B,
        platform: Platform,
        options: TaskOptions,
    ) -> Self {
        let name = name.into();
        let mut triggers: TriggerSet = options.triggers.iter().cloned().collect();
        triggers.insert(EventTag::check(name.clone()));
        let state = TaskState::new(behavior.new_status());

        Self {
            inner: Arc::new(TaskInner {
                name,
                behavior,
                platform,
                options,
                parameters: RwLock::new(None),
                state: Mutex::new(state),
                update_lock: tokio::sync::Mutex::new(()),
                lifecycle: tokio::sync::Mutex::new(()),
                timer: Mutex::new(TaskTimer::default()),
                subscription: Mutex::new(Subscription {
                    triggers,
                    listener: None,
                }),
                worker: Mutex::new(None),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Task name, also the key its parameters are persisted under
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Task-specific behavior
    pub fn behavior(&self) -> &B {
        &self.inner.behavior
    }

    /// Platform services
    pub fn platform(&self) -> &Platform {
        &self.inner.platform
    }

    /// Whether the task is started
    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Parameters in effect, or fresh defaults before the first start
    pub fn parameters(&self) -> Arc<B::Params> {
        self.current_parameters()
            .unwrap_or_else(|| Arc::new(self.inner.behavior.new_parameters()))
    }

    fn current_parameters(&self) -> Option<Arc<B::Params>> {
        self.inner
            .parameters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the task: restore persisted parameters, subscribe to triggers
    /// and apply the parameters, which schedules the first check.
    ///
    /// Starting a started task is a logged no-op.
    pub async fn start(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.is_started() {
            debug!(task = %self.inner.name, "Not restarting running task");
            return;
        }

        // Nothing may run before the saved parameters are in place
        let parameters = self.restore_parameters().await;
        {
            let _update = self.inner.update_lock.lock().await;
            *self
                .inner
                .parameters
                .write()
                .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(parameters.clone()));

            *locked(&self.inner.worker) = Some(CheckWorker::spawn(self.inner.name.clone()));
            self.inner.started.store(true, Ordering::SeqCst);
            self.subscribe(&mut locked(&self.inner.subscription));

            self.replace_parameters(parameters).await;
        }

        let now = Utc::now();
        self.update_state(|state| {
            if state.has_started() {
                state.restarted = now;
            } else {
                state.started = now;
            }
        });
        info!(task = %self.inner.name, "Started task");
    }

    /// Stop the task: cancel the timer, unsubscribe, drain queued checks
    /// (bounded wait) and persist the current parameters.
    ///
    /// Stopping a stopped task is a logged no-op.
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if !self.is_started() {
            debug!(task = %self.inner.name, "Task already stopped");
            return;
        }

        self.inner.behavior.on_stop(self).await;

        self.inner.started.store(false, Ordering::SeqCst);
        locked(&self.inner.timer).cancel();
        Self::unsubscribe(&mut locked(&self.inner.subscription));

        let worker = locked(&self.inner.worker).take();
        if let Some(worker) = worker {
            worker
                .shutdown(&self.inner.name, self.inner.options.drain_timeout)
                .await;
        }

        self.persist_parameters().await;
        info!(task = %self.inner.name, "Stopped task");
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    /// Replace the parameters.
    ///
    /// Equal parameters are a no-op and return false. Otherwise the timer is
    /// re-armed at the new interval, one check is scheduled immediately and
    /// the new value is persisted.
    pub async fn update_parameters(&self, parameters: B::Params) -> bool {
        let _update = self.inner.update_lock.lock().await;
        if self
            .current_parameters()
            .is_some_and(|current| *current == parameters)
        {
            debug!(task = %self.inner.name, "Parameters have not changed");
            return false;
        }

        self.replace_parameters(parameters).await;
        true
    }

    /// Caller holds the update lock
    async fn replace_parameters(&self, parameters: B::Params) {
        let _wake = self.inner.platform.wake_lock.acquire();
        let interval = parameters.check_interval();
        let started = self.is_started();

        if self.inner.options.periodic_timer {
            locked(&self.inner.timer).cancel();
        }

        *self
            .inner
            .parameters
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(parameters));

        if started {
            self.schedule_check();
            if self.inner.options.periodic_timer {
                self.repeating(interval);
            }
        }

        self.persist_parameters().await;

        let now = Utc::now();
        self.update_state(|state| state.parameter_update = now);
        info!(
            task = %self.inner.name,
            interval_secs = interval.as_secs(),
            "Applied parameters"
        );
    }

    async fn restore_parameters(&self) -> B::Params {
        let name = &self.inner.name;
        match self.inner.platform.store.load(name).await {
            Ok(Some(blob)) => match serde_json::from_str::<B::Params>(&blob) {
                Ok(parameters) => {
                    debug!(task = %name, "Recovered saved parameters");
                    parameters
                }
                Err(e) => {
                    warn!(task = %name, error = %e, "Saved parameters are corrupt, using defaults");
                    self.inner.behavior.new_parameters()
                }
            },
            Ok(None) => {
                debug!(task = %name, "No saved parameters, using defaults");
                self.inner.behavior.new_parameters()
            }
            Err(e) => {
                warn!(task = %name, error = %e, "Failed to load saved parameters, using defaults");
                self.inner.behavior.new_parameters()
            }
        }
    }

    async fn persist_parameters(&self) {
        let Some(parameters) = self.current_parameters() else {
            return;
        };

        let blob = match serde_json::to_string(&*parameters) {
            Ok(blob) => blob,
            Err(e) => {
                error!(task = %self.inner.name, error = %e, "Failed to serialize parameters");
                return;
            }
        };

        if let Err(e) = self.inner.platform.store.save(&self.inner.name, &blob).await {
            warn!(task = %self.inner.name, error = %e, "Failed to persist parameters");
        }
    }

    // ========================================================================
    // Worker queue
    // ========================================================================

    /// Queue one check with the current parameters.
    ///
    /// Returns false if the task is not started.
    pub fn schedule_check(&self) -> bool {
        let parameters = self.parameters();
        let task = self.clone();
        self.enqueue(async move { task.run_check(parameters).await })
    }

    /// Queue arbitrary work on the task's worker, behind any queued checks.
    ///
    /// Returns false if the task is not started.
    pub fn enqueue<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let worker = locked(&self.inner.worker);
        match worker.as_ref() {
            Some(worker) if worker.submit(job.boxed()) => true,
            _ => {
                debug!(task = %self.inner.name, "Task not running, dropping job");
                false
            }
        }
    }

    /// Wait until everything queued so far has run.
    ///
    /// Returns false if the task is not started.
    pub async fn wait_idle(&self) -> bool {
        let (done, finished) = tokio::sync::oneshot::channel();
        if !self.enqueue(async move {
            let _ = done.send(());
        }) {
            return false;
        }
        finished.await.is_ok()
    }

    async fn run_check(&self, parameters: Arc<B::Params>) {
        let _wake = self.inner.platform.wake_lock.acquire();
        debug!(task = %self.inner.name, "Running check");

        let outcome = AssertUnwindSafe(self.inner.behavior.check(self, parameters))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => debug!(task = %self.inner.name, "Check finished"),
            Ok(Err(e)) => error!(task = %self.inner.name, error = %e, "Check failed"),
            Err(_) => error!(task = %self.inner.name, "Check panicked"),
        }

        let now = Utc::now();
        self.update_state(|state| state.last_check = now);
    }

    // ========================================================================
    // Timer
    // ========================================================================

    /// Fire a check every `interval`, replacing any pending timer.
    ///
    /// Returns false if the task is not started.
    pub fn repeating(&self, interval: Duration) -> bool {
        self.arm_timer(TimerMode::Repeating, interval)
    }

    /// Fire one check after `interval`, replacing any pending timer.
    ///
    /// Returns false if the task is not started.
    pub fn one_shot(&self, interval: Duration) -> bool {
        self.arm_timer(TimerMode::OneShot, interval)
    }

    /// Cancel the pending timer; returns whether one was pending
    pub fn cancel_timer(&self) -> bool {
        locked(&self.inner.timer).cancel()
    }

    /// Whether a timer is pending
    pub fn has_pending_timer(&self) -> bool {
        locked(&self.inner.timer).is_armed()
    }

    fn arm_timer(&self, mode: TimerMode, interval: Duration) -> bool {
        let mut timer = locked(&self.inner.timer);
        if !self.is_started() {
            debug!(task = %self.inner.name, "Not arming timer on stopped task");
            return false;
        }
        timer.arm(
            mode,
            interval,
            self.inner.platform.bus.clone(),
            self.inner.name.clone(),
        );
        true
    }

    // ========================================================================
    // Triggers
    // ========================================================================

    /// Add a trigger tag; returns false if it was already present
    pub fn add_trigger(&self, tag: EventTag) -> bool {
        let mut subscription = locked(&self.inner.subscription);
        if subscription.triggers.contains(&tag) {
            return false;
        }

        let started = self.is_started();
        if started {
            Self::unsubscribe(&mut subscription);
        }
        debug!(task = %self.inner.name, %tag, "Adding trigger");
        subscription.triggers.insert(tag);
        if started {
            self.subscribe(&mut subscription);
        }
        true
    }

    /// Remove a trigger tag; returns false if it was not present
    pub fn remove_trigger(&self, tag: &EventTag) -> bool {
        let mut subscription = locked(&self.inner.subscription);
        if !subscription.triggers.contains(tag) {
            return false;
        }

        let started = self.is_started();
        if started {
            Self::unsubscribe(&mut subscription);
        }
        debug!(task = %self.inner.name, %tag, "Removing trigger");
        subscription.triggers.remove(tag);
        if started {
            self.subscribe(&mut subscription);
        }
        true
    }

    /// Current trigger tags
    pub fn triggers(&self) -> TriggerSet {
        locked(&self.inner.subscription).triggers.clone()
    }

    fn subscribe(&self, subscription: &mut Subscription) {
        let mut events = self
            .inner
            .platform
            .bus
            .subscribe_filtered(subscription.triggers.clone());
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let task = Arc::downgrade(&self.inner);
        let name = self.inner.name.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            let Some(inner) = task.upgrade() else { break };
                            debug!(task = %name, tag = %event.tag(), "Trigger received");
                            PeriodicTask { inner }.schedule_check();
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(task = %name, skipped, "Trigger listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        });

        subscription.listener = Some(token);
    }

    fn unsubscribe(subscription: &mut Subscription) {
        if let Some(listener) = subscription.listener.take() {
            listener.cancel();
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Mutate the task-specific status
    pub fn update_status<R>(&self, f: impl FnOnce(&mut B::Status) -> R) -> R {
        f(&mut locked(&self.inner.state).status)
    }

    /// Copy of the task-specific status
    pub fn status(&self) -> B::Status {
        locked(&self.inner.state).status.clone()
    }

    fn update_state(&self, f: impl FnOnce(&mut TaskState<B::Params, B::Status>)) {
        f(&mut locked(&self.inner.state));
    }

    /// Point-in-time snapshot of the state, including current parameters
    pub fn state(&self) -> TaskState<B::Params, B::Status> {
        let mut snapshot = locked(&self.inner.state).clone();
        snapshot.parameters = self.current_parameters().map(|p| (*p).clone());
        snapshot
    }

    /// Refresh the status and serialize a snapshot
    pub async fn state_document(&self) -> Result<Value> {
        self.inner.behavior.refresh_status(self).await;
        Ok(serde_json::to_value(self.state())?)
    }
}

#[async_trait]
impl<B: TaskBehavior> ManifestReceiver for PeriodicTask<B> {
    fn receiver_name(&self) -> String {
        self.inner.name.clone()
    }

    async fn get_state(&self) -> Result<Option<Value>> {
        self.state_document().await.map(Some)
    }

    async fn parameters_updated(&self, document: &Value) -> bool {
        match serde_json::from_value::<B::Params>(document.clone()) {
            Ok(parameters) => {
                self.update_parameters(parameters).await;
                true
            }
            Err(e) => {
                warn!(task = %self.inner.name, error = %e, "Rejected manifest parameters");
                false
            }
        }
    }
}
