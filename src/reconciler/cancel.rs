//! Cancellation primitives: the sticky cancel flag and the shutdown token.
//!
//! Two orthogonal signals stop a reconciler. The `CancelFlag` is the user
//! path: sticky, observed asynchronously by workers and the aggregator,
//! converging on a clean `StopByUser` teardown. The `ShutdownToken` is the
//! context path: it aborts promptly without clean teardown.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// A sticky per-pipeline cancellation flag.
///
/// Cancelling is idempotent; the first reason wins. There is no uncancel.
#[derive(Debug, Default)]
pub struct CancelFlag {
    canceled: AtomicBool,
    reason: RwLock<Option<String>>,
}

impl CancelFlag {
    /// Creates a flag in the not-canceled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag with a reason. Only the first reason is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .canceled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.reason.write() = Some(reason.into());
        }
    }

    /// Returns whether the flag has been raised.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }
}

/// An async shutdown signal for the external-context path.
///
/// Cloneable; every clone observes the same signal. Raising it tells the
/// reconciler and the retry helper to return promptly instead of finishing
/// their work.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    /// Creates a token in the not-shut-down state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Signals shutdown to every clone of this token.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    /// Returns whether shutdown has been signaled.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Waits until shutdown is signaled.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
