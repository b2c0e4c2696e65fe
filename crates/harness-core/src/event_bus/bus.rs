use super::types::{PlatformEvent, TriggerSet};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::trace;

/// Default number of events buffered per listener
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Platform-wide event channel.
///
/// Device transitions, timer expirations and upload completions go out to
/// every listener. A listener that falls more than `capacity` events behind
/// skips the oldest ones instead of stalling the publisher.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PlatformEvent>,
}

impl EventBus {
    /// Bus buffering up to `capacity` events per listener
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Every event published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.sender.subscribe()
    }

    /// Events published from now on whose tag is in `triggers`
    #[must_use]
    pub fn subscribe_filtered(&self, triggers: TriggerSet) -> TriggerReceiver {
        TriggerReceiver {
            events: self.sender.subscribe(),
            triggers,
        }
    }

    /// Deliver `event` to the current listeners and return how many there
    /// were. Nobody listening is not an error.
    pub fn publish(&self, event: PlatformEvent) -> usize {
        let tag = event.tag();
        let listeners = self.sender.send(event).unwrap_or(0);
        trace!(%tag, listeners, "Published platform event");
        listeners
    }

    /// Number of live listeners, filtered or not
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// Listener that only wakes for events matching its trigger set
#[derive(Debug)]
pub struct TriggerReceiver {
    events: broadcast::Receiver<PlatformEvent>,
    triggers: TriggerSet,
}

impl TriggerReceiver {
    /// Next matching event.
    ///
    /// Cancel safe. Errors with [`RecvError::Lagged`] when events were
    /// skipped, which may include matching ones, and with
    /// [`RecvError::Closed`] once every bus handle is gone.
    pub async fn recv(&mut self) -> Result<PlatformEvent, RecvError> {
        loop {
            let event = self.events.recv().await?;
            if self.triggers.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Tags this receiver wakes for
    #[must_use]
    pub fn triggers(&self) -> &TriggerSet {
        &self.triggers
    }
}
