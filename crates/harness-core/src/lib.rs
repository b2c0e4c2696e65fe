//! Harness Core - Periodic Task Engine
//!
//! This crate provides the building blocks every telemetry task runs on:
//! - Task: lifecycle, persisted parameters, exclusive checks, triggers, timers
//! - Params: configuration and status records
//! - Event bus: platform events delivered to task triggers
//! - Wake lock: reference-counted suspend blocker
//! - Platform: parameter storage, device status, identity and HTTP transport
//! - Receiver: the contract tasks expose to the manifest synchronizer

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod event_bus;
pub mod params;
pub mod platform;
pub mod receiver;
pub mod task;
pub mod wake_lock;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use error::{Result, TaskError, TransportError};
pub use event_bus::{EventBus, EventTag, PlatformEvent, TriggerReceiver, TriggerSet};
pub use params::{Parameters, TaskState, DEFAULT_CHECK_INTERVAL_SECS};
pub use platform::{
    hash_hex, join_url, DeviceIdentity, DeviceMonitor, HttpTransport, MemoryParameterStore,
    ParameterStore, Platform, PlugType, PowerStatus, SimulatedDevice, SqliteParameterStore,
    TransferOptions, Transport,
};
pub use receiver::{is_empty_document, ManifestReceiver};
pub use task::{PeriodicTask, TaskBehavior, TaskOptions, DEFAULT_DRAIN_TIMEOUT};
pub use wake_lock::{NoopSuspendBlocker, SuspendBlocker, WakeGuard, WakeLock};
