//! Binary completion signal
//!
//! Set/cleared, never counted: releasing an already-released signal is a
//! no-op, and a waiter consumes the single pending release.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct CompletionSignal {
    set: Mutex<bool>,
    notify: Notify,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal and wake one waiter. Never blocks.
    pub fn release(&self) {
        *self.set.lock() = true;
        self.notify.notify_one();
    }

    /// Drop a pending release, if any.
    pub fn clear(&self) {
        *self.set.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Consume a pending release without waiting.
    pub fn try_take(&self) -> bool {
        std::mem::replace(&mut *self.set.lock(), false)
    }

    /// Wait until released, then clear.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.try_take() {
                return;
            }
            // A stale permit may wake us with nothing set; re-check.
            notified.await;
        }
    }

    /// Bounded wait. Returns `false` if the deadline passed first.
    pub async fn wait_timeout(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait()).await.is_ok()
    }
}
