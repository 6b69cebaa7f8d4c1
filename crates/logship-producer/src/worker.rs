//! Dispatch queue and the bounded I/O worker pool.
//!
//! Sealed batches flow through a bounded MPMC channel to worker tasks that
//! perform the transport send, classify the outcome, invoke callbacks and
//! either release the memory reservation or schedule a retry. Workers are
//! spawned on demand up to `max_io_worker_count` and exit after an idle
//! interval; closing the channel is the shutdown broadcast (receivers
//! drain what is buffered, then see the channel as terminated).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::batch::{Attempt, AttemptKind, ProducerBatch};
use crate::error::ProducerError;
use crate::memory::MemoryAccount;
use crate::monitor::ProducerMonitor;
use crate::retry::RetryPolicy;
use crate::retry_queue::RetryQueue;
use crate::transport::{SendStatus, Transport};

const DISPATCH_QUEUE_FLOOR: usize = 16;
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub(crate) struct IoWorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    tx: async_channel::Sender<ProducerBatch>,
    rx: async_channel::Receiver<ProducerBatch>,
    transport: Arc<dyn Transport>,
    retry_queue: Arc<RetryQueue>,
    memory: Arc<MemoryAccount>,
    monitor: Arc<ProducerMonitor>,
    policy: RetryPolicy,
    max_workers: usize,
    active_workers: AtomicUsize,
    /// Worker-drain flag: once set, retryable failures become terminal.
    draining: AtomicBool,
    /// Signalled whenever `active_workers` drops to zero.
    all_idle: Notify,
}

impl IoWorkerPool {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        retry_queue: Arc<RetryQueue>,
        memory: Arc<MemoryAccount>,
        monitor: Arc<ProducerMonitor>,
        policy: RetryPolicy,
        max_workers: usize,
    ) -> Self {
        let capacity = max_workers.saturating_mul(2).max(DISPATCH_QUEUE_FLOOR);
        let (tx, rx) = async_channel::bounded(capacity);
        Self {
            inner: Arc::new(PoolInner {
                tx,
                rx,
                transport,
                retry_queue,
                memory,
                monitor,
                policy,
                max_workers,
                active_workers: AtomicUsize::new(0),
                draining: AtomicBool::new(false),
                all_idle: Notify::new(),
            }),
        }
    }

    /// Enqueue a sealed batch and make sure a worker exists to pick it up.
    ///
    /// Blocks when the queue is at capacity; this is the only backpressure
    /// the pool exerts on the mover. A send on the closed queue means the
    /// shutdown already passed the drain point, so the batch is cancelled.
    pub(crate) async fn dispatch(&self, batch: ProducerBatch) {
        if let Err(rejected) = self.inner.tx.send(batch).await {
            PoolInner::finish_failure(&self.inner, rejected.into_inner(), ProducerError::Cancelled);
            return;
        }
        self.maybe_spawn();
    }

    fn maybe_spawn(&self) {
        let inner = &self.inner;
        loop {
            let active = inner.active_workers.load(Ordering::SeqCst);
            if active >= inner.max_workers || inner.rx.is_empty() {
                return;
            }
            if inner
                .active_workers
                .compare_exchange(active, active + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let worker = Arc::clone(inner);
                tokio::spawn(PoolInner::worker_loop(worker));
                return;
            }
        }
    }

    /// Set the worker-drain flag; in-flight and queued batches that fail
    /// retryably from now on are terminal.
    pub(crate) fn begin_drain(&self) {
        self.inner.draining.store(true, Ordering::SeqCst);
    }

    /// Close the dispatch queue. Workers finish the buffered batches, then
    /// exit.
    pub(crate) fn close_queue(&self) {
        self.inner.tx.close();
    }

    /// Wait until every worker has exited.
    pub(crate) async fn await_workers(&self) {
        loop {
            if self.inner.active_workers.load(Ordering::SeqCst) == 0 {
                return;
            }
            self.inner.all_idle.notified().await;
        }
    }

    pub(crate) async fn await_workers_timeout(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.await_workers()).await.is_ok()
    }

    /// Cancel everything still sitting in the queue after a timed-out
    /// bounded close. Returns how many batches were cancelled.
    pub(crate) fn cancel_pending(&self) -> usize {
        let mut cancelled = 0;
        while let Ok(batch) = self.inner.rx.try_recv() {
            PoolInner::finish_failure(&self.inner, batch, ProducerError::Cancelled);
            cancelled += 1;
        }
        cancelled
    }
}

impl PoolInner {
    async fn worker_loop(inner: Arc<PoolInner>) {
        debug!("io worker started");
        loop {
            let batch = match tokio::time::timeout(WORKER_IDLE_TIMEOUT, inner.rx.recv()).await {
                Ok(Ok(batch)) => batch,
                Ok(Err(_)) => break, // queue closed and fully drained
                Err(_) => {
                    // Idle: give the slot back, then re-check for a batch
                    // that raced in while this worker was deciding to exit.
                    Self::release_slot(&inner);
                    if !inner.rx.is_empty() && Self::try_acquire_slot(&inner) {
                        continue;
                    }
                    debug!("io worker idle, exiting");
                    return;
                }
            };

            // Run each batch in its own task so a panicking callback cannot
            // take the worker down with it.
            let handler = Arc::clone(&inner);
            if let Err(join_error) = tokio::spawn(Self::handle(handler, batch)).await {
                if join_error.is_panic() {
                    error!(error = %join_error, "batch handler panicked");
                }
            }
        }
        Self::release_slot(&inner);
        debug!("io worker exited");
    }

    fn release_slot(inner: &PoolInner) {
        if inner.active_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
            inner.all_idle.notify_one();
        }
    }

    fn try_acquire_slot(inner: &PoolInner) -> bool {
        let mut active = inner.active_workers.load(Ordering::SeqCst);
        loop {
            if active >= inner.max_workers {
                return false;
            }
            match inner.active_workers.compare_exchange(
                active,
                active + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => active = observed,
            }
        }
    }

    /// Send one batch and settle its outcome.
    async fn handle(inner: Arc<PoolInner>, mut batch: ProducerBatch) {
        let outcome = inner.transport.send(batch.key(), batch.records()).await;
        let kind = inner.policy.classify(&outcome.status);
        inner.monitor.record_send_latency(outcome.latency);
        let attempt_index = batch.next_attempt_index();
        batch.push_attempt(Attempt::from_outcome(attempt_index, kind, &outcome));

        match kind {
            AttemptKind::Success => Self::finish_success(&inner, batch),
            AttemptKind::RetryableTransport | AttemptKind::RetryableServer => {
                let attempts = batch.attempt_count();
                if attempts > inner.policy.max_retry_times() {
                    Self::finish_failure(
                        &inner,
                        batch,
                        ProducerError::RetriesExhausted { attempts },
                    );
                } else if inner.draining.load(Ordering::SeqCst) {
                    Self::finish_failure(&inner, batch, ProducerError::Cancelled);
                } else {
                    let delay = inner.policy.backoff(attempts);
                    debug!(
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        "batch send failed, scheduling retry"
                    );
                    inner.monitor.record_retry();
                    if let Err(batch) = inner.retry_queue.push(batch, Instant::now() + delay) {
                        // Retry queue already closed by the shutdown drain.
                        Self::finish_failure(&inner, batch, ProducerError::Cancelled);
                    }
                }
            }
            AttemptKind::TerminalServer => {
                let error = match &outcome.status {
                    SendStatus::Http {
                        status,
                        code,
                        message,
                    } => ProducerError::TerminalServer {
                        status: *status,
                        code: code.clone(),
                        message: message.clone(),
                    },
                    // classify() only yields TerminalServer for HTTP statuses.
                    _ => ProducerError::TerminalServer {
                        status: 0,
                        code: String::new(),
                        message: String::new(),
                    },
                };
                Self::finish_failure(&inner, batch, error);
            }
        }
    }

    fn finish_success(inner: &PoolInner, batch: ProducerBatch) {
        debug!(
            project = %batch.key().project,
            logstore = %batch.key().logstore,
            records = batch.record_count(),
            attempts = batch.attempt_count(),
            "batch delivered"
        );
        batch.fire_success();
        inner.memory.release(batch.byte_size());
        inner.monitor.record_success(batch.record_count() as u64);
    }

    fn finish_failure(inner: &PoolInner, batch: ProducerBatch, error: ProducerError) {
        warn!(
            project = %batch.key().project,
            logstore = %batch.key().logstore,
            records = batch.record_count(),
            attempts = batch.attempt_count(),
            error = %error,
            "batch discarded"
        );
        batch.fire_failure(&error);
        inner.memory.release(batch.byte_size());
        inner.monitor.record_failure(batch.record_count() as u64);
    }
}
