//! Global memory budget shared by every pipeline stage.
//!
//! One atomic counter tracks the bytes owned by in-flight records, from
//! admission until the owning batch reaches a terminal state. Admission
//! waits are signalled through a [`Notify`] rather than polled: every
//! release wakes the registered waiters, which then re-attempt the
//! reservation.

use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// Admission wait policy derived from `max_block_sec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockPolicy {
    /// Fail immediately when the budget is exhausted.
    Never,
    /// Wait up to the given duration for memory to free up.
    Bounded(Duration),
    /// Wait indefinitely.
    Forever,
}

impl BlockPolicy {
    pub(crate) fn from_max_block_sec(secs: i64) -> Self {
        match secs {
            0 => BlockPolicy::Never,
            s if s < 0 => BlockPolicy::Forever,
            s => BlockPolicy::Bounded(Duration::from_secs(s as u64)),
        }
    }
}

pub(crate) struct MemoryAccount {
    limit: usize,
    used: AtomicUsize,
    released: Notify,
}

impl MemoryAccount {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            used: AtomicUsize::new(0),
            released: Notify::new(),
        }
    }

    pub(crate) fn in_use(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    /// Reserve `bytes` if they fit under the limit right now.
    pub(crate) fn try_reserve(&self, bytes: usize) -> bool {
        let mut current = self.used.load(Ordering::SeqCst);
        loop {
            if current + bytes > self.limit {
                return false;
            }
            match self.used.compare_exchange_weak(
                current,
                current + bytes,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Wait for the budget per `policy` after a failed [`try_reserve`].
    ///
    /// Returns whether the reservation was eventually made.
    pub(crate) async fn reserve_wait(&self, bytes: usize, policy: BlockPolicy) -> bool {
        let deadline = match policy {
            BlockPolicy::Never => return false,
            BlockPolicy::Forever => None,
            BlockPolicy::Bounded(limit) => Some(Instant::now() + limit),
        };
        loop {
            // Register before re-checking, so a release between the check
            // and the await is not lost.
            let mut released = pin!(self.released.notified());
            released.as_mut().enable();
            if self.try_reserve(bytes) {
                return true;
            }
            match deadline {
                None => released.await,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    if tokio::time::timeout(deadline - now, released).await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    /// Return `bytes` to the budget and wake admission waiters.
    pub(crate) fn release(&self, bytes: usize) {
        let previous = self.used.fetch_sub(bytes, Ordering::SeqCst);
        debug_assert!(previous >= bytes, "memory release exceeds reservation");
        self.released.notify_waiters();
    }
}
