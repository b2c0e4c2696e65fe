//! Process-wide wake lock
//!
//! Keeps the device awake while checks, parameter updates and upload batches
//! run. Holders take a [`WakeGuard`]; the backend is asked to block suspension
//! when the first guard is taken and released when the last one drops.
//!
//! ## Usage
//!
//! ```ignore
//! let wake_lock = WakeLock::new("harness", Arc::new(NoopSuspendBlocker));
//! {
//!     let _guard = wake_lock.acquire();
//!     // device stays awake here
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Platform hook that actually keeps the device from suspending
pub trait SuspendBlocker: Send + Sync {
    /// Block suspension
    fn acquire(&self);
    /// Allow suspension again
    fn release(&self);
}

/// Blocker for hosts without a suspend state
#[derive(Debug, Default)]
pub struct NoopSuspendBlocker;

impl SuspendBlocker for NoopSuspendBlocker {
    fn acquire(&self) {}
    fn release(&self) {}
}

/// Reference-counted wake lock shared by every task
#[derive(Clone)]
pub struct WakeLock {
    inner: Arc<WakeLockInner>,
}

struct WakeLockInner {
    name: String,
    holders: AtomicUsize,
    /// Serializes the 0 <-> 1 transitions with the backend calls
    transition: Mutex<()>,
    blocker: Arc<dyn SuspendBlocker>,
}

impl WakeLock {
    /// Create a new wake lock backed by `blocker`
    pub fn new(name: impl Into<String>, blocker: Arc<dyn SuspendBlocker>) -> Self {
        Self {
            inner: Arc::new(WakeLockInner {
                name: name.into(),
                holders: AtomicUsize::new(0),
                transition: Mutex::new(()),
                blocker,
            }),
        }
    }

    /// Take a hold on the lock; the hold ends when the guard drops
    #[must_use]
    pub fn acquire(&self) -> WakeGuard {
        let _transition = self
            .inner
            .transition
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if self.inner.holders.fetch_add(1, Ordering::SeqCst) == 0 {
            debug!(lock = %self.inner.name, "Acquiring wake lock");
            self.inner.blocker.acquire();
        }
        WakeGuard { lock: self.clone() }
    }

    /// Number of outstanding guards
    #[must_use]
    pub fn holders(&self) -> usize {
        self.inner.holders.load(Ordering::SeqCst)
    }

    /// Whether any guard is outstanding
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.holders() > 0
    }

    fn release(&self) {
        let _transition = self
            .inner
            .transition
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if self.inner.holders.fetch_sub(1, Ordering::SeqCst) == 1 {
            debug!(lock = %self.inner.name, "Releasing wake lock");
            self.inner.blocker.release();
        }
    }
}

impl Default for WakeLock {
    fn default() -> Self {
        Self::new("harness", Arc::new(NoopSuspendBlocker))
    }
}

impl std::fmt::Debug for WakeLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeLock")
            .field("name", &self.inner.name)
            .field("holders", &self.holders())
            .finish()
    }
}

/// Hold on a [`WakeLock`]
pub struct WakeGuard {
    lock: WakeLock,
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}
