//! Admission Semaphore (spec §4.B): caps the number of Process Supervisor
//! invocations in flight across the whole process.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{CoreError, Result};

/// Non-blocking snapshot of the semaphore's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreStatus {
    pub available: usize,
    pub waiting: usize,
    pub max_concurrent: usize,
}

/// A held slot. Dropping it (or passing it to
/// [`AdmissionSemaphore::release`]) returns the slot; `tokio`'s owned permit
/// can only ever be consumed once, so double-release is not possible.
pub struct SlotTicket {
    _permit: OwnedSemaphorePermit,
}

/// Process-global bound on concurrent Agent CLI invocations.
///
/// Waiters are served in the FIFO order `tokio::sync::Semaphore` already
/// guarantees; there is no priority or preemption.
pub struct AdmissionSemaphore {
    inner: Arc<Semaphore>,
    max_concurrent: usize,
    waiting: Arc<AtomicUsize>,
}

impl AdmissionSemaphore {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Block until a slot is free, or until `cancel` fires — in which case
    /// this waiter is simply dropped from the queue without affecting
    /// others.
    pub async fn acquire(&self, cancel: tokio::sync::oneshot::Receiver<()>) -> Result<SlotTicket> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut cancel = cancel;
            tokio::select! {
                biased;
                _ = &mut cancel => Err(CoreError::Cancelled),
                permit = Arc::clone(&self.inner).acquire_owned() => {
                    permit
                        .map(|p| SlotTicket { _permit: p })
                        .map_err(|_| CoreError::Internal("admission semaphore closed".into()))
                }
            }
        };
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    /// Explicit release, for callers that want the slot freed at a precise
    /// point rather than at scope end.
    pub fn release(&self, ticket: SlotTicket) {
        drop(ticket);
    }

    pub fn status(&self) -> SemaphoreStatus {
        SemaphoreStatus {
            available: self.inner.available_permits(),
            waiting: self.waiting.load(Ordering::SeqCst),
            max_concurrent: self.max_concurrent,
        }
    }
}
