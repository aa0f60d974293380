//! Cooperative shutdown signal.
//!
//! Every long-running component (accept loop, keep-alive timer, watcher task,
//! client poll loop) owns a clone of one [`ShutdownSignal`].  Raising it is a
//! one-way transition: loops stop scheduling new work at their next check
//! point, and sleeps that race against the signal return early.  Work that is
//! already in flight is allowed to finish or fail on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cloneable, one-shot cancellation flag that can also be awaited.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal.
    ///
    /// Returns `true` for the call that actually flipped the flag and `false`
    /// for every later call, which lets owners make their teardown idempotent.
    pub fn cancel(&self) -> bool {
        let first = !self.inner.cancelled.swap(true, Ordering::SeqCst);
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Completes once the signal has been raised.
    pub async fn cancelled(&self) {
        // Register interest before checking the flag so a concurrent `cancel`
        // cannot slip between the check and the await.
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Sleeps for `duration` unless the signal is raised first.
    ///
    /// Returns `true` if the full duration elapsed and `false` if the sleep
    /// was cut short by cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => !self.is_cancelled(),
        }
    }
}
