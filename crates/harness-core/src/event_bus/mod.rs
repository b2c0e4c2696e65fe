//! EventBus - broadcast-based delivery of platform events to task triggers.
//!
//! Device transitions, timer expirations and upload completions are published
//! here; every started task listens for the tags in its trigger set.

/// Broadcast channel and trigger-filtered receivers.
pub mod bus;
/// Platform event and trigger tag definitions.
pub mod types;

pub use bus::{EventBus, TriggerReceiver, DEFAULT_BUS_CAPACITY};
pub use types::{EventTag, PlatformEvent, TriggerSet};
