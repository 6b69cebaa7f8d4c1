//! Records, batch keys and in-flight batches.
//!
//! A [`ProducerBatch`] accumulates records that share a [`BatchKey`] until a
//! size, count or age trigger seals it. Sealed batches travel through the
//! dispatch queue, the worker pool and (on retryable failure) the retry
//! queue as a unit, so records of one key are never reordered or split.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::ProducerError;
use crate::transport::{SendOutcome, SendStatus};

/// Fixed per-record overhead charged against batch size and the global
/// budget, covering the timestamp and wire framing.
const RECORD_OVERHEAD_BYTES: usize = 16;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A single log record submitted by the caller.
///
/// Payloads are stored as [`Bytes`] so cloning a record never copies the
/// data.
#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl LogRecord {
    /// Create a record stamped with the current wall time.
    ///
    /// # Arguments
    ///
    /// * `payload` - Opaque payload bytes; anything convertible to
    ///   [`Bytes`] (`Vec<u8>`, `&'static [u8]`, `String`, ...)
    ///
    /// # Returns
    ///
    /// A new `LogRecord` timestamped with the current time.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let record = LogRecord::new("payload bytes");
    /// ```
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            timestamp_ms: now_ms(),
        }
    }

    /// Create a record with an explicit timestamp.
    ///
    /// # Arguments
    ///
    /// * `payload` - Opaque payload bytes
    /// * `timestamp_ms` - Creation time in milliseconds since the Unix
    ///   epoch
    ///
    /// # Returns
    ///
    /// A new `LogRecord` carrying the given timestamp.
    pub fn with_timestamp(payload: impl Into<Bytes>, timestamp_ms: u64) -> Self {
        Self {
            payload: payload.into(),
            timestamp_ms,
        }
    }

    /// Approximate serialized size of this record.
    ///
    /// # Returns
    ///
    /// Payload length plus a fixed overhead for the timestamp and wire
    /// framing; this is the figure charged against the batch caps and the
    /// global memory budget.
    pub fn size_bytes(&self) -> usize {
        self.payload.len() + RECORD_OVERHEAD_BYTES
    }
}

/// Tuple that partitions submissions into independent batches.
///
/// Equal keys share the open batch; ordering is only guaranteed within a
/// key. `shard_hash` holds the (possibly bucket-adjusted) routing hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    /// Destination namespace.
    pub project: String,
    /// Destination log store within the project.
    pub logstore: String,
    /// Optional routing hash, already adjusted when bucketing is enabled.
    pub shard_hash: Option<String>,
    pub topic: String,
    pub source: String,
}

/// Classification of one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    Success,
    /// The request never reached the server (I/O error, timeout).
    RetryableTransport,
    /// The server answered but the condition is transient (5xx, write
    /// quota).
    RetryableServer,
    /// The server rejected the batch for good.
    TerminalServer,
}

/// One entry of a batch's bounded attempt log, reported to callbacks.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// 1-based attempt number.
    pub index: usize,
    pub success: bool,
    pub kind: AttemptKind,
    /// HTTP status, when the server answered.
    pub http_status: Option<u16>,
    /// Server error code, empty unless the server sent one.
    pub error_code: String,
    pub message: String,
    pub request_id: Option<String>,
    /// Wall time of the attempt in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    pub latency: Duration,
}

impl Attempt {
    pub(crate) fn from_outcome(index: usize, kind: AttemptKind, outcome: &SendOutcome) -> Self {
        let (http_status, error_code, message) = match &outcome.status {
            SendStatus::Ok => (None, String::new(), String::new()),
            SendStatus::Http {
                status,
                code,
                message,
            } => (Some(*status), code.clone(), message.clone()),
            SendStatus::Transport { message } => (None, String::new(), message.clone()),
        };
        Self {
            index,
            success: kind == AttemptKind::Success,
            kind,
            http_status,
            error_code,
            message,
            request_id: outcome.request_id.clone(),
            timestamp_ms: now_ms(),
            latency: outcome.latency,
        }
    }
}

/// Delivery notification attached to a submission.
///
/// Exactly one of the two methods is invoked, exactly once, after the batch
/// holding the submission reaches a terminal state. Callbacks run on a
/// worker task and should not block.
pub trait Callback: Send + Sync {
    /// The batch was accepted by the server.
    ///
    /// # Arguments
    ///
    /// * `attempts` - Bounded attempt log, including the successful final
    ///   attempt
    fn on_success(&self, attempts: &[Attempt]);

    /// The batch was discarded.
    ///
    /// # Arguments
    ///
    /// * `attempts` - Bounded attempt log accumulated before giving up
    /// * `error` - Terminal reason: `TerminalServer`, `RetriesExhausted`
    ///   or `Cancelled`
    fn on_failure(&self, attempts: &[Attempt], error: &ProducerError);
}

/// A destination-keyed group of records moving through the pipeline as a
/// unit.
pub(crate) struct ProducerBatch {
    key: BatchKey,
    records: Vec<LogRecord>,
    callbacks: Vec<Arc<dyn Callback>>,
    byte_size: usize,
    created_at: Instant,
    attempts: Vec<Attempt>,
    /// Total attempts performed, independent of attempt-log truncation.
    attempt_count: usize,
    max_reserved_attempts: usize,
}

impl ProducerBatch {
    pub(crate) fn new(key: BatchKey, max_reserved_attempts: usize) -> Self {
        Self {
            key,
            records: Vec::new(),
            callbacks: Vec::new(),
            byte_size: 0,
            created_at: Instant::now(),
            attempts: Vec::new(),
            attempt_count: 0,
            max_reserved_attempts,
        }
    }

    pub(crate) fn key(&self) -> &BatchKey {
        &self.key
    }

    pub(crate) fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub(crate) fn record_count(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub(crate) fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    pub(crate) fn attempt_count(&self) -> usize {
        self.attempt_count
    }

    /// 1-based index of the attempt about to be performed.
    pub(crate) fn next_attempt_index(&self) -> usize {
        self.attempt_count + 1
    }

    pub(crate) fn append(&mut self, records: Vec<LogRecord>, callback: Option<Arc<dyn Callback>>) {
        for record in &records {
            self.byte_size += record.size_bytes();
        }
        self.records.extend(records);
        if let Some(callback) = callback {
            self.callbacks.push(callback);
        }
    }

    /// Would admitting `incoming` push this batch past either cap?
    pub(crate) fn would_overflow(
        &self,
        incoming_bytes: usize,
        incoming_count: usize,
        max_bytes: usize,
        max_count: usize,
    ) -> bool {
        self.byte_size + incoming_bytes > max_bytes || self.records.len() + incoming_count > max_count
    }

    /// The batch reached a cap and should be sealed without waiting for the
    /// linger to expire.
    pub(crate) fn at_capacity(&self, max_bytes: usize, max_count: usize) -> bool {
        self.byte_size >= max_bytes || self.records.len() >= max_count
    }

    /// Record an attempt, dropping the oldest entry once the log is full.
    pub(crate) fn push_attempt(&mut self, attempt: Attempt) {
        self.attempt_count += 1;
        if self.attempts.len() >= self.max_reserved_attempts {
            self.attempts.remove(0);
        }
        self.attempts.push(attempt);
    }

    pub(crate) fn fire_success(&self) {
        for callback in &self.callbacks {
            callback.on_success(&self.attempts);
        }
    }

    pub(crate) fn fire_failure(&self, error: &ProducerError) {
        for callback in &self.callbacks {
            callback.on_failure(&self.attempts, error);
        }
    }
}
