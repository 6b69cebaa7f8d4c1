//! Producer façade: submission API, lifecycle and the shutdown driver.
//!
//! The producer wires the pipeline together with one-way dependencies: the
//! accumulator owns the dispatch handle and the budget, the mover owns the
//! accumulator, retry queue and dispatch handle, and the workers own the
//! retry queue and the budget. No component holds a reference back to this
//! façade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::accumulator::Accumulator;
use crate::batch::{BatchKey, Callback, LogRecord};
use crate::config::ProducerConfig;
use crate::error::{ProducerError, Result};
use crate::memory::MemoryAccount;
use crate::monitor::{MonitorSnapshot, ProducerMonitor, REPORT_INTERVAL};
use crate::mover::Mover;
use crate::retry::RetryPolicy;
use crate::retry_queue::RetryQueue;
use crate::shard_hash::adjust_shard_hash;
use crate::transport::Transport;
use crate::worker::IoWorkerPool;

/// Asynchronous batching producer.
///
/// Submissions return as soon as the records are admitted under the memory
/// budget; delivery happens later in large destination-keyed batches, with
/// transparent retries on transient failures. Delivery outcomes are
/// reported through the [`Callback`] attached per submission.
///
/// The producer is `Send + Sync`; share it across tasks with an [`Arc`].
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use logship_producer::{LogRecord, Producer, ProducerConfig};
///
/// let producer = Producer::builder()
///     .transport(transport)
///     .linger_ms(500)
///     .max_retry_times(5)
///     .build()?;
/// producer.start();
///
/// producer
///     .send("my-project", "app-logs", "checkout", "host-1",
///           LogRecord::new("payload"), None)
///     .await?;
///
/// producer.safe_close().await;
/// ```
pub struct Producer {
    config: ProducerConfig,
    accumulator: Arc<Accumulator>,
    retry_queue: Arc<RetryQueue>,
    pool: IoWorkerPool,
    memory: Arc<MemoryAccount>,
    monitor: Arc<ProducerMonitor>,
    started: AtomicBool,
    closed: AtomicBool,
    mover_handle: Mutex<Option<JoinHandle<()>>>,
    report_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Producer {
    /// Create a producer over the given transport. Out-of-range
    /// configuration values are corrected to defaults (with a warning),
    /// never rejected.
    pub fn new(config: ProducerConfig, transport: Arc<dyn Transport>) -> Self {
        let config = config.validated();
        let memory = Arc::new(MemoryAccount::new(config.total_size_in_bytes));
        let monitor = Arc::new(ProducerMonitor::new());
        let retry_queue = Arc::new(RetryQueue::new());
        let pool = IoWorkerPool::new(
            transport,
            Arc::clone(&retry_queue),
            Arc::clone(&memory),
            Arc::clone(&monitor),
            RetryPolicy::from_config(&config),
            config.max_io_worker_count,
        );
        let accumulator = Arc::new(Accumulator::new(
            &config,
            Arc::clone(&memory),
            Arc::clone(&monitor),
            pool.clone(),
        ));
        Self {
            config,
            accumulator,
            retry_queue,
            pool,
            memory,
            monitor,
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            mover_handle: Mutex::new(None),
            report_handle: Mutex::new(None),
        }
    }

    pub fn builder() -> ProducerBuilder {
        ProducerBuilder::new()
    }

    /// Launch the mover and, unless disabled, the metrics report task.
    /// Idempotent: repeated calls are no-ops. Must run inside a tokio
    /// runtime.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("producer starting");
        let mover = Mover::new(
            Arc::clone(&self.accumulator),
            Arc::clone(&self.retry_queue),
            self.pool.clone(),
        );
        *self.mover_handle.lock().expect("mover handle lock poisoned") =
            Some(tokio::spawn(mover.run()));
        if !self.config.disable_runtime_metrics {
            *self
                .report_handle
                .lock()
                .expect("report handle lock poisoned") =
                Some(Arc::clone(&self.monitor).spawn_report_task(REPORT_INTERVAL));
        }
    }

    /// Submit one record.
    ///
    /// # Arguments
    ///
    /// * `project` - Destination namespace
    /// * `logstore` - Destination log store within the project
    /// * `topic` - Topic recorded on the batch
    /// * `source` - Source recorded on the batch
    /// * `record` - Record to submit
    /// * `callback` - Optional delivery notification, invoked once the
    ///   owning batch reaches a terminal state
    ///
    /// # Returns
    ///
    /// `Ok(())` as soon as the record is admitted under the memory budget;
    /// delivery happens later and is reported through `callback`.
    ///
    /// # Errors
    ///
    /// - `MemoryExhausted`: the admission wait elapsed
    /// - `InvalidArgument`: the record exceeds `max_batch_size`
    /// - `ProducerClosed`: shutdown already started
    ///
    /// # Examples
    ///
    /// ```ignore
    /// producer
    ///     .send("my-project", "app-logs", "checkout", "host-1",
    ///           LogRecord::new("payload"), None)
    ///     .await?;
    /// ```
    pub async fn send(
        &self,
        project: impl Into<String>,
        logstore: impl Into<String>,
        topic: impl Into<String>,
        source: impl Into<String>,
        record: LogRecord,
        callback: Option<Arc<dyn Callback>>,
    ) -> Result<()> {
        self.add(project, logstore, None, topic, source, vec![record], callback)
            .await
    }

    /// Submit a list of records that must stay together in one batch.
    ///
    /// # Arguments
    ///
    /// * `project` - Destination namespace
    /// * `logstore` - Destination log store within the project
    /// * `topic` - Topic recorded on the batch
    /// * `source` - Source recorded on the batch
    /// * `records` - Records to submit; they ride one batch and are never
    ///   split or reordered
    /// * `callback` - Optional delivery notification for the whole list
    ///
    /// # Returns
    ///
    /// `Ok(())` once the whole list is admitted under the memory budget.
    ///
    /// # Errors
    ///
    /// - `MemoryExhausted`: the admission wait elapsed
    /// - `InvalidArgument`: the list is empty, or a single record exceeds
    ///   `max_batch_size`
    /// - `BatchSizeExceeded`: the list as a whole exceeds `max_batch_size`
    ///   or `max_batch_count`
    /// - `ProducerClosed`: shutdown already started
    pub async fn send_list(
        &self,
        project: impl Into<String>,
        logstore: impl Into<String>,
        topic: impl Into<String>,
        source: impl Into<String>,
        records: Vec<LogRecord>,
        callback: Option<Arc<dyn Callback>>,
    ) -> Result<()> {
        self.add(project, logstore, None, topic, source, records, callback)
            .await
    }

    /// Submit one record with a routing hash.
    ///
    /// # Arguments
    ///
    /// * `project` - Destination namespace
    /// * `logstore` - Destination log store within the project
    /// * `shard_hash` - Routing hash as up to 32 hex digits; rounded to its
    ///   bucket boundary when `adjust_shard_hash` is enabled, so nearby
    ///   hashes share a batch
    /// * `topic` - Topic recorded on the batch
    /// * `source` - Source recorded on the batch
    /// * `record` - Record to submit
    /// * `callback` - Optional delivery notification
    ///
    /// # Returns
    ///
    /// `Ok(())` as soon as the record is admitted under the memory budget.
    ///
    /// # Errors
    ///
    /// All of [`send`](Self::send)'s errors, plus `InvalidArgument` for a
    /// malformed routing hash.
    #[allow(clippy::too_many_arguments)]
    pub async fn hash_send(
        &self,
        project: impl Into<String>,
        logstore: impl Into<String>,
        shard_hash: impl Into<String>,
        topic: impl Into<String>,
        source: impl Into<String>,
        record: LogRecord,
        callback: Option<Arc<dyn Callback>>,
    ) -> Result<()> {
        self.add(
            project,
            logstore,
            Some(shard_hash.into()),
            topic,
            source,
            vec![record],
            callback,
        )
        .await
    }

    /// Submit a record list with a routing hash.
    ///
    /// # Arguments
    ///
    /// * `project` - Destination namespace
    /// * `logstore` - Destination log store within the project
    /// * `shard_hash` - Routing hash as up to 32 hex digits; rounded to its
    ///   bucket boundary when `adjust_shard_hash` is enabled
    /// * `topic` - Topic recorded on the batch
    /// * `source` - Source recorded on the batch
    /// * `records` - Records to submit; they ride one batch and are never
    ///   split or reordered
    /// * `callback` - Optional delivery notification for the whole list
    ///
    /// # Returns
    ///
    /// `Ok(())` once the whole list is admitted under the memory budget.
    ///
    /// # Errors
    ///
    /// All of [`send_list`](Self::send_list)'s errors, plus
    /// `InvalidArgument` for a malformed routing hash.
    #[allow(clippy::too_many_arguments)]
    pub async fn hash_send_list(
        &self,
        project: impl Into<String>,
        logstore: impl Into<String>,
        shard_hash: impl Into<String>,
        topic: impl Into<String>,
        source: impl Into<String>,
        records: Vec<LogRecord>,
        callback: Option<Arc<dyn Callback>>,
    ) -> Result<()> {
        self.add(
            project,
            logstore,
            Some(shard_hash.into()),
            topic,
            source,
            records,
            callback,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn add(
        &self,
        project: impl Into<String>,
        logstore: impl Into<String>,
        shard_hash: Option<String>,
        topic: impl Into<String>,
        source: impl Into<String>,
        records: Vec<LogRecord>,
        callback: Option<Arc<dyn Callback>>,
    ) -> Result<()> {
        let shard_hash = match shard_hash {
            Some(hash) if self.config.adjust_shard_hash => {
                Some(adjust_shard_hash(&hash, self.config.buckets)?)
            }
            other => other,
        };
        let key = BatchKey {
            project: project.into(),
            logstore: logstore.into(),
            shard_hash,
            topic: topic.into(),
            source: source.into(),
        };
        self.accumulator.add(key, records, callback).await
    }

    /// Bytes currently owned by in-flight records across all stages.
    pub fn in_flight_bytes(&self) -> usize {
        self.memory.in_use()
    }

    /// Current runtime counters.
    pub fn monitor(&self) -> MonitorSnapshot {
        self.monitor.snapshot()
    }

    /// Bounded close: drain for at most `timeout_ms`, then cancel whatever
    /// never reached a worker and return [`ProducerError::Timeout`].
    ///
    /// # Arguments
    ///
    /// * `timeout_ms` - Maximum drain time in milliseconds, measured from
    ///   the moment this method is entered
    ///
    /// # Returns
    ///
    /// `Ok(())` when every admitted record reached a terminal state within
    /// the budget.
    ///
    /// # Errors
    ///
    /// `Timeout` when the budget expired with batches still in flight;
    /// batches that never reached a worker get failure callbacks with
    /// `Cancelled`, while in-flight sends finish in the background.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Give the drain two seconds, then give up.
    /// producer.close(2_000).await?;
    /// ```
    pub async fn close(&self, timeout_ms: u64) -> Result<()> {
        self.shutdown(Some(Duration::from_millis(timeout_ms))).await
    }

    /// Unbounded close: wait until every admitted record reached a terminal
    /// state. Idempotent.
    ///
    /// # Returns
    ///
    /// Nothing; when this method returns, every callback has fired, every
    /// worker has exited and the memory budget reads zero. Calling it again
    /// is a no-op.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// producer.safe_close().await;
    /// assert_eq!(producer.in_flight_bytes(), 0);
    /// ```
    pub async fn safe_close(&self) {
        let _ = self.shutdown(None).await;
    }

    async fn shutdown(&self, timeout: Option<Duration>) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let close_started = Instant::now();
        info!("producer closing");

        // Stop admission; from here on retryable failures are terminal.
        self.accumulator.close();
        self.pool.begin_drain();

        // Let the mover seal everything and drain the retry queue. If
        // start() was never called, perform its final drain inline.
        let mover = self
            .mover_handle
            .lock()
            .expect("mover handle lock poisoned")
            .take();
        match mover {
            Some(handle) => {
                if let Err(join_error) = handle.await {
                    if join_error.is_panic() {
                        error!(error = %join_error, "mover task panicked during shutdown");
                    }
                }
            }
            None => {
                for batch in self.accumulator.seal_all() {
                    self.pool.dispatch(batch).await;
                }
                for batch in self.retry_queue.close_and_drain() {
                    self.pool.dispatch(batch).await;
                }
            }
        }

        // Sentinel broadcast: workers finish the buffered batches and exit.
        self.pool.close_queue();

        let result = match timeout {
            None => {
                self.pool.await_workers().await;
                Ok(())
            }
            Some(limit) => {
                let remaining = limit.saturating_sub(close_started.elapsed());
                if self.pool.await_workers_timeout(remaining).await {
                    Ok(())
                } else {
                    let cancelled = self.pool.cancel_pending();
                    warn!(cancelled, "close timed out, undelivered batches cancelled");
                    Err(ProducerError::Timeout)
                }
            }
        };

        if let Some(handle) = self
            .report_handle
            .lock()
            .expect("report handle lock poisoned")
            .take()
        {
            handle.abort();
        }
        if result.is_ok() {
            info!("producer closed");
        }
        result
    }
}

/// Fluent configuration for [`Producer`].
///
/// Every option defaults to the value documented on
/// [`ProducerConfig`]; only the transport is required.
pub struct ProducerBuilder {
    config: ProducerConfig,
    transport: Option<Arc<dyn Transport>>,
}

impl ProducerBuilder {
    pub fn new() -> Self {
        Self {
            config: ProducerConfig::default(),
            transport: None,
        }
    }

    /// Set the transport that delivers sealed batches (required).
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn total_size_in_bytes(mut self, bytes: usize) -> Self {
        self.config.total_size_in_bytes = bytes;
        self
    }

    pub fn max_batch_size(mut self, bytes: usize) -> Self {
        self.config.max_batch_size = bytes;
        self
    }

    pub fn max_batch_count(mut self, count: usize) -> Self {
        self.config.max_batch_count = count;
        self
    }

    pub fn linger_ms(mut self, millis: u64) -> Self {
        self.config.linger_ms = millis;
        self
    }

    pub fn max_io_worker_count(mut self, count: usize) -> Self {
        self.config.max_io_worker_count = count;
        self
    }

    pub fn max_block_sec(mut self, secs: i64) -> Self {
        self.config.max_block_sec = secs;
        self
    }

    pub fn max_retry_times(mut self, times: usize) -> Self {
        self.config.max_retry_times = times;
        self
    }

    pub fn base_retry_backoff_ms(mut self, millis: u64) -> Self {
        self.config.base_retry_backoff_ms = millis;
        self
    }

    pub fn max_retry_backoff_ms(mut self, millis: u64) -> Self {
        self.config.max_retry_backoff_ms = millis;
        self
    }

    pub fn max_reserved_attempts(mut self, attempts: usize) -> Self {
        self.config.max_reserved_attempts = attempts;
        self
    }

    pub fn adjust_shard_hash(mut self, adjust: bool) -> Self {
        self.config.adjust_shard_hash = adjust;
        self
    }

    pub fn buckets(mut self, buckets: u32) -> Self {
        self.config.buckets = buckets;
        self
    }

    pub fn no_retry_status_code_list(mut self, codes: Vec<u16>) -> Self {
        self.config.no_retry_status_code_list = codes;
        self
    }

    pub fn disable_runtime_metrics(mut self, disable: bool) -> Self {
        self.config.disable_runtime_metrics = disable;
        self
    }

    /// Build the producer. Fails only when no transport was supplied.
    pub fn build(self) -> Result<Producer> {
        let transport = self.transport.ok_or_else(|| {
            ProducerError::InvalidArgument("a transport is required to build a producer".into())
        })?;
        Ok(Producer::new(self.config, transport))
    }
}

impl Default for ProducerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
