//! Level-triggered event flag.

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// An asynchronous boolean flag that tasks can wait on.
///
/// Unlike a one-shot notification, an `Event` is level-triggered and
/// reusable: while the event is set, every [`wait`](Event::wait) resolves
/// immediately; after [`clear`](Event::clear), waiters block again until the
/// next [`set`](Event::set).
///
/// Waking is edge-complete: a waiter that obtained its wait future before
/// `set` is guaranteed to be woken by it, and a caller that observed
/// `is_set() == true` is guaranteed an already-resolved `wait`.
pub struct Event {
    inner: Mutex<Inner>,
}

struct Inner {
    value: bool,
    // Cancelled exactly when `value` flips to true; replaced on clear so the
    // next generation of waiters blocks on a fresh token.
    epoch: CancellationToken,
}

impl Event {
    /// Create a new event in the unset state.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                value: false,
                epoch: CancellationToken::new(),
            }),
        }
    }

    /// Return the current state of the event.
    pub fn is_set(&self) -> bool {
        self.inner.lock().value
    }

    /// Ensure the event is true, waking all current waiters.
    ///
    /// Returns `true` if this call performed the false→true transition,
    /// `false` if the event was already set.
    pub fn set(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.value {
            return false;
        }
        // Cancel while holding the lock so a concurrent `wait` cannot grab
        // the old epoch after observing `value == false`.
        inner.value = true;
        inner.epoch.cancel();
        true
    }

    /// Ensure the event is false.
    ///
    /// Returns `true` if this call performed the true→false transition,
    /// `false` if the event was already clear. Waiters that grabbed the
    /// previous epoch still wake; only waits issued after the clear block.
    pub fn clear(&self) -> bool {
        let mut inner = self.inner.lock();
        if !inner.value {
            return false;
        }
        inner.value = false;
        inner.epoch = CancellationToken::new();
        true
    }

    /// Wait until the event is true, which may be immediately.
    pub async fn wait(&self) {
        let epoch = self.inner.lock().epoch.clone();
        epoch.cancelled().await;
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event").field("set", &self.is_set()).finish()
    }
}
