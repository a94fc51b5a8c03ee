//! Cooperative cancellation (spec §4.G "Cancellation", §5).
//!
//! One [`CancelToken`] is shared by every Process Supervisor invocation
//! belonging to a single Async Execution Facade run, so tripping it once
//! (server shutdown) reaches every round — including ones not yet spawned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Notify};

struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner { cancelled: AtomicBool::new(false), notify: Notify::new() }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// A fresh one-shot receiver that resolves when this token is
    /// cancelled, for handing to a single `supervisor::supervise` or
    /// `AdmissionSemaphore::acquire` call.
    pub fn child_receiver(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            // Check-act-check around `Notify` per its documented pattern:
            // build the `Notified` future before the second check so a
            // `notify_waiters` landing between the two checks isn't missed.
            if !inner.cancelled.load(Ordering::SeqCst) {
                let notified = inner.notify.notified();
                tokio::pin!(notified);
                if !inner.cancelled.load(Ordering::SeqCst) {
                    notified.await;
                }
            }
            let _ = tx.send(());
        });
        rx
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
