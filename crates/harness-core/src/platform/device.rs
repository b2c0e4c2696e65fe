//! Device power and network status

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

use crate::event_bus::{EventBus, PlatformEvent};

/// Source of external power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlugType {
    /// Wall charger
    Ac,
    /// USB port
    Usb,
    /// Wireless pad
    Wireless,
}

/// Snapshot of the device's power status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerStatus {
    /// Whether the battery is charging
    pub charging: bool,
    /// Power source, if plugged in
    pub plug: Option<PlugType>,
}

impl PowerStatus {
    /// Running on battery
    #[must_use]
    pub fn unplugged() -> Self {
        Self::default()
    }

    /// Charging from the given source
    #[must_use]
    pub fn charging(plug: PlugType) -> Self {
        Self {
            charging: true,
            plug: Some(plug),
        }
    }

    /// Plugged into the given source with a full battery
    #[must_use]
    pub fn full(plug: PlugType) -> Self {
        Self {
            charging: false,
            plug: Some(plug),
        }
    }
}

/// Read-only view of the device state the tasks gate on
pub trait DeviceMonitor: Send + Sync {
    /// Whether a network connection is currently available
    fn is_connected(&self) -> bool;

    /// Current power status
    fn power_status(&self) -> PowerStatus;
}

/// Device whose state is set by the host process.
///
/// Every change is published on the event bus the same way the platform
/// broadcasts real transitions, so tasks react through their triggers.
pub struct SimulatedDevice {
    connected: AtomicBool,
    power: Mutex<PowerStatus>,
    bus: EventBus,
}

impl SimulatedDevice {
    /// Create a new simulated device
    pub fn new(bus: EventBus, connected: bool, power: PowerStatus) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            power: Mutex::new(power),
            bus,
        }
    }

    /// Change network availability; publishes `ConnectivityChanged` on change
    pub fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) != connected {
            debug!(connected, "Connectivity changed");
            self.bus.publish(PlatformEvent::ConnectivityChanged);
        }
    }

    /// Change power status; publishes `PowerConnected` or `PowerDisconnected`
    /// when the plug state flips
    pub fn set_power(&self, status: PowerStatus) {
        let previous = {
            let mut power = self.power.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *power, status)
        };

        match (previous.plug.is_some(), status.plug.is_some()) {
            (false, true) => {
                debug!(plug = ?status.plug, "Power connected");
                self.bus.publish(PlatformEvent::PowerConnected);
            }
            (true, false) => {
                debug!("Power disconnected");
                self.bus.publish(PlatformEvent::PowerDisconnected);
            }
            _ => {}
        }
    }
}

impl DeviceMonitor for SimulatedDevice {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn power_status(&self) -> PowerStatus {
        *self.power.lock().unwrap_or_else(|e| e.into_inner())
    }
}
