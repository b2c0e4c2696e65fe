//! Per-task timer
//!
//! Expirations are published on the event bus as `Check` events, so they
//! reach the task through the same trigger path as platform broadcasts.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event_bus::{EventBus, PlatformEvent};

/// Shortest interval a timer will be armed with
pub const MIN_TIMER_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerMode {
    Repeating,
    OneShot,
}

/// At most one pending timer; arming cancels the previous one
#[derive(Default)]
pub(crate) struct TaskTimer {
    pending: Option<CancellationToken>,
}

impl TaskTimer {
    pub(crate) fn arm(&mut self, mode: TimerMode, interval: Duration, bus: EventBus, task: String) {
        self.cancel();

        let interval = interval.max(MIN_TIMER_INTERVAL);
        let token = CancellationToken::new();
        let cancelled = token.clone();

        debug!(task = %task, ?mode, interval_secs = interval.as_secs(), "Arming timer");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        bus.publish(PlatformEvent::Check { task: task.clone() });
                        if mode == TimerMode::OneShot {
                            cancelled.cancel();
                            break;
                        }
                    }
                }
            }
        });

        self.pending = Some(token);
    }

    /// Cancel the pending timer; returns whether one was armed
    pub(crate) fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(token) => {
                let armed = !token.is_cancelled();
                token.cancel();
                armed
            }
            None => false,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|t| !t.is_cancelled())
    }
}
