//! Platform services injected into every task
//!
//! Storage, device status, identity and network transport are modelled as
//! traits so the engine can run against real services or test doubles.

mod device;
mod identity;
mod store;
mod transport;

use std::sync::Arc;

use crate::event_bus::EventBus;
use crate::wake_lock::WakeLock;

pub use device::{DeviceMonitor, PlugType, PowerStatus, SimulatedDevice};
pub use identity::{hash_hex, join_url, DeviceIdentity};
pub use store::{MemoryParameterStore, ParameterStore, SqliteParameterStore};
pub use transport::{gzip, gzip_stream, HttpTransport, TransferOptions, Transport};

/// Handles shared by every task in the process
#[derive(Clone)]
pub struct Platform {
    /// Event bus carrying triggers
    pub bus: EventBus,
    /// Persisted parameter storage
    pub store: Arc<dyn ParameterStore>,
    /// Process-wide wake lock
    pub wake_lock: WakeLock,
    /// Network and power status
    pub device: Arc<dyn DeviceMonitor>,
    /// Version and device identifiers
    pub identity: DeviceIdentity,
    /// Network transport
    pub transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("identity", &self.identity)
            .field("wake_lock", &self.wake_lock)
            .finish_non_exhaustive()
    }
}
