//! Destination-keyed batch accumulation under the global memory budget.
//!
//! One open batch exists per [`BatchKey`] at any instant. Admission seals
//! the current batch before an overflowing append (so no batch ever
//! exceeds the caps), and the mover seals batches whose age passes the
//! linger threshold. The open-batch map is guarded by a single mutex; no
//! await happens while it is held, sealed batches are dispatched after the
//! lock is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::batch::{BatchKey, Callback, LogRecord, ProducerBatch};
use crate::config::ProducerConfig;
use crate::error::{ProducerError, Result};
use crate::memory::{BlockPolicy, MemoryAccount};
use crate::monitor::ProducerMonitor;
use crate::worker::IoWorkerPool;

pub(crate) struct Accumulator {
    max_batch_size: usize,
    max_batch_count: usize,
    linger: Duration,
    max_reserved_attempts: usize,
    block_policy: BlockPolicy,
    batches: Mutex<HashMap<BatchKey, ProducerBatch>>,
    memory: Arc<MemoryAccount>,
    monitor: Arc<ProducerMonitor>,
    pool: IoWorkerPool,
    closed: AtomicBool,
}

impl Accumulator {
    pub(crate) fn new(
        config: &ProducerConfig,
        memory: Arc<MemoryAccount>,
        monitor: Arc<ProducerMonitor>,
        pool: IoWorkerPool,
    ) -> Self {
        Self {
            max_batch_size: config.max_batch_size,
            max_batch_count: config.max_batch_count,
            linger: config.linger(),
            max_reserved_attempts: config.max_reserved_attempts,
            block_policy: BlockPolicy::from_max_block_sec(config.max_block_sec),
            batches: Mutex::new(HashMap::new()),
            memory,
            monitor,
            pool,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Admit `records` into the open batch for `key`, sealing as needed.
    pub(crate) async fn add(
        &self,
        key: BatchKey,
        records: Vec<LogRecord>,
        callback: Option<Arc<dyn Callback>>,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(ProducerError::ProducerClosed);
        }
        if records.is_empty() {
            return Err(ProducerError::InvalidArgument("record list is empty".into()));
        }
        if let Some(record) = records.iter().find(|r| r.size_bytes() > self.max_batch_size) {
            return Err(ProducerError::InvalidArgument(format!(
                "a single record of {} bytes exceeds the {} byte batch cap",
                record.size_bytes(),
                self.max_batch_size
            )));
        }
        let incoming_bytes: usize = records.iter().map(LogRecord::size_bytes).sum();
        if incoming_bytes > self.max_batch_size || records.len() > self.max_batch_count {
            return Err(ProducerError::BatchSizeExceeded(format!(
                "{} records / {} bytes",
                records.len(),
                incoming_bytes
            )));
        }

        self.reserve(incoming_bytes).await?;

        let incoming_count = records.len();
        let sealed = {
            let mut batches = self.batches.lock().expect("accumulator lock poisoned");
            // Re-checked under the lock: the mover's seal-all runs after the
            // flag is set, so an admission landing here either precedes the
            // final drain (and is drained) or observes the flag.
            if self.is_closed() {
                drop(batches);
                self.memory.release(incoming_bytes);
                return Err(ProducerError::ProducerClosed);
            }

            let mut sealed = Vec::new();
            let overflows = batches.get(&key).is_some_and(|open| {
                open.would_overflow(
                    incoming_bytes,
                    incoming_count,
                    self.max_batch_size,
                    self.max_batch_count,
                )
            });
            if overflows {
                if let Some(full) = batches.remove(&key) {
                    sealed.push(full);
                }
            }
            let open = batches
                .entry(key.clone())
                .or_insert_with(|| ProducerBatch::new(key.clone(), self.max_reserved_attempts));
            open.append(records, callback);
            let full_now = open.at_capacity(self.max_batch_size, self.max_batch_count);
            if full_now {
                if let Some(full) = batches.remove(&key) {
                    sealed.push(full);
                }
            }
            sealed
        };

        for batch in sealed {
            self.pool.dispatch(batch).await;
        }
        Ok(())
    }

    async fn reserve(&self, bytes: usize) -> Result<()> {
        if self.memory.try_reserve(bytes) {
            return Ok(());
        }
        let waited_from = Instant::now();
        let reserved = self.memory.reserve_wait(bytes, self.block_policy).await;
        self.monitor.record_memory_wait(waited_from.elapsed());
        if reserved {
            Ok(())
        } else {
            self.monitor.record_memory_wait_failure();
            warn!(bytes, "admission refused: memory budget wait elapsed");
            Err(ProducerError::MemoryExhausted)
        }
    }

    /// Seal and return every open batch whose age reached the linger.
    pub(crate) fn seal_expired(&self, now: Instant) -> Vec<ProducerBatch> {
        let mut batches = self.batches.lock().expect("accumulator lock poisoned");
        let expired: Vec<BatchKey> = batches
            .iter()
            .filter(|(_, batch)| batch.age(now) >= self.linger)
            .map(|(key, _)| key.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|key| batches.remove(&key))
            .collect()
    }

    /// Seal and return every open batch (shutdown drain).
    pub(crate) fn seal_all(&self) -> Vec<ProducerBatch> {
        let mut batches = self.batches.lock().expect("accumulator lock poisoned");
        batches.drain().map(|(_, batch)| batch).collect()
    }
}
