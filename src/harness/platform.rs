//! Platform wiring from configuration

use anyhow::{Context, Result};
use harness_core::{
    DeviceIdentity, EventBus, HttpTransport, NoopSuspendBlocker, Platform, SimulatedDevice,
    SqliteParameterStore, WakeLock,
};
use std::sync::Arc;
use tracing::info;

use super::config::{AppConfig, DeviceConfig};

/// Capacity of the platform event bus
const EVENT_BUS_CAPACITY: usize = 256;

/// Identity from an explicit id, a hashed hardware id, or the host name
pub fn device_identity(device: &DeviceConfig) -> DeviceIdentity {
    match (&device.device_id, &device.hardware_id) {
        (Some(id), _) => DeviceIdentity::new(&device.version_name, &device.version_code, id),
        (None, Some(hardware_id)) => {
            DeviceIdentity::from_hardware_id(&device.version_name, &device.version_code, hardware_id)
        }
        (None, None) => DeviceIdentity::local(&device.version_name, &device.version_code),
    }
}

/// Build the shared platform services.
///
/// Returns the simulated device separately so the host can drive it.
pub async fn build_platform(config: &AppConfig) -> Result<(Platform, Arc<SimulatedDevice>)> {
    let bus = EventBus::new(EVENT_BUS_CAPACITY);

    let store_path = config.store_path();
    if let Some(parent) = store_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create data directory")?;
    }
    let store = SqliteParameterStore::from_path(&store_path)
        .await
        .context("Failed to initialize SQLite parameter store")?;
    info!(path = %store_path.display(), "Parameter store ready");

    let device = Arc::new(SimulatedDevice::new(
        bus.clone(),
        config.device.connected,
        config.device.power.status(),
    ));
    let identity = device_identity(&config.device);
    info!(
        version = %identity.version_name,
        device = %identity.device_id,
        "Device identity"
    );

    let platform = Platform {
        bus,
        store: Arc::new(store),
        wake_lock: WakeLock::new("harness", Arc::new(NoopSuspendBlocker)),
        device: device.clone(),
        identity,
        transport: Arc::new(HttpTransport::new()),
    };
    Ok((platform, device))
}
