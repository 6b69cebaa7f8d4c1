//! Min-heap of batches waiting for their next attempt.
//!
//! The queue owns no timers; the mover polls it each tick and promotes
//! entries whose deadline has passed. Once closed (during the mover's final
//! drain), pushes are refused so no batch can be stranded behind the
//! shutdown.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::Instant;

use crate::batch::ProducerBatch;

struct RetryEntry {
    deadline: Instant,
    batch: ProducerBatch,
}

impl PartialEq for RetryEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for RetryEntry {}

impl PartialOrd for RetryEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RetryEntry {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline)
    }
}

struct Inner {
    heap: BinaryHeap<RetryEntry>,
    closed: bool,
}

pub(crate) struct RetryQueue {
    inner: Mutex<Inner>,
}

impl RetryQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                closed: false,
            }),
        }
    }

    /// Schedule `batch` for another attempt at `deadline`.
    ///
    /// Fails with the batch handed back once the queue has been closed by
    /// the shutdown drain; the caller must then finish the batch itself.
    pub(crate) fn push(
        &self,
        batch: ProducerBatch,
        deadline: Instant,
    ) -> Result<(), ProducerBatch> {
        let mut inner = self.inner.lock().expect("retry queue lock poisoned");
        if inner.closed {
            return Err(batch);
        }
        inner.heap.push(RetryEntry { deadline, batch });
        Ok(())
    }

    /// Pop every entry whose deadline is at or before `now`.
    pub(crate) fn pop_ready(&self, now: Instant) -> Vec<ProducerBatch> {
        let mut inner = self.inner.lock().expect("retry queue lock poisoned");
        let mut ready = Vec::new();
        while inner.heap.peek().is_some_and(|entry| entry.deadline <= now) {
            if let Some(entry) = inner.heap.pop() {
                ready.push(entry.batch);
            }
        }
        ready
    }

    /// Close the queue and hand back everything still scheduled.
    pub(crate) fn close_and_drain(&self) -> Vec<ProducerBatch> {
        let mut inner = self.inner.lock().expect("retry queue lock poisoned");
        inner.closed = true;
        inner.heap.drain().map(|entry| entry.batch).collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().expect("retry queue lock poisoned").heap.len()
    }
}
