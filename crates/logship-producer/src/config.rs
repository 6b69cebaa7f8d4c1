//! Producer configuration and range validation.
//!
//! Out-of-range values never fail construction; `validated` corrects them
//! back to the defaults and logs a warning per corrected field.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_TOTAL_SIZE_IN_BYTES: usize = 100 * 1024 * 1024;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 5 * 1024 * 1024;
pub const DEFAULT_MAX_BATCH_COUNT: usize = 40960;
pub const DEFAULT_LINGER_MS: u64 = 2000;
pub const MIN_LINGER_MS: u64 = 100;
pub const DEFAULT_MAX_IO_WORKER_COUNT: usize = 50;
pub const DEFAULT_MAX_BLOCK_SEC: i64 = 60;
pub const DEFAULT_MAX_RETRY_TIMES: usize = 10;
pub const DEFAULT_BASE_RETRY_BACKOFF_MS: u64 = 100;
pub const DEFAULT_MAX_RETRY_BACKOFF_MS: u64 = 50_000;
pub const DEFAULT_MAX_RESERVED_ATTEMPTS: usize = 11;
pub const DEFAULT_BUCKETS: u32 = 64;

/// Operational parameters of a [`Producer`](crate::producer::Producer).
///
/// All fields are public; construct with `ProducerConfig::default()` and
/// override what you need, or use the
/// [`ProducerBuilder`](crate::producer::ProducerBuilder) setters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Global ceiling on bytes owned by in-flight records across all
    /// pipeline stages.
    pub total_size_in_bytes: usize,

    /// Per-batch byte cap; clamped to `1..=5 MiB`.
    pub max_batch_size: usize,

    /// Per-batch record cap; clamped to `1..=40960`.
    pub max_batch_count: usize,

    /// Maximum age of an open batch before the mover seals it; at least
    /// 100 ms.
    pub linger_ms: u64,

    /// Upper bound on concurrently sending I/O workers.
    pub max_io_worker_count: usize,

    /// Admission wait policy when the memory budget is exhausted:
    /// `0` fails immediately, negative waits indefinitely, positive waits
    /// up to that many seconds.
    pub max_block_sec: i64,

    /// Retries allowed per batch on retryable failures.
    pub max_retry_times: usize,

    /// Backoff before the first retry; doubles per retry.
    pub base_retry_backoff_ms: u64,

    /// Ceiling applied to the exponential backoff.
    pub max_retry_backoff_ms: u64,

    /// Bound on the per-batch attempt log; older entries are dropped first.
    pub max_reserved_attempts: usize,

    /// Round caller-supplied routing hashes down to bucket boundaries so
    /// nearby hashes share a batch.
    pub adjust_shard_hash: bool,

    /// Bucket count for hash adjustment; a power of two in `1..=256`.
    pub buckets: u32,

    /// HTTP status codes that are never retried, regardless of the default
    /// classification.
    pub no_retry_status_code_list: Vec<u16>,

    /// Skip spawning the periodic runtime-metrics report task.
    pub disable_runtime_metrics: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            total_size_in_bytes: DEFAULT_TOTAL_SIZE_IN_BYTES,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_count: DEFAULT_MAX_BATCH_COUNT,
            linger_ms: DEFAULT_LINGER_MS,
            max_io_worker_count: DEFAULT_MAX_IO_WORKER_COUNT,
            max_block_sec: DEFAULT_MAX_BLOCK_SEC,
            max_retry_times: DEFAULT_MAX_RETRY_TIMES,
            base_retry_backoff_ms: DEFAULT_BASE_RETRY_BACKOFF_MS,
            max_retry_backoff_ms: DEFAULT_MAX_RETRY_BACKOFF_MS,
            max_reserved_attempts: DEFAULT_MAX_RESERVED_ATTEMPTS,
            adjust_shard_hash: true,
            buckets: DEFAULT_BUCKETS,
            no_retry_status_code_list: Vec::new(),
            disable_runtime_metrics: false,
        }
    }
}

impl ProducerConfig {
    /// Clamp out-of-range values back to the defaults, logging one warning
    /// per corrected field. Construction never fails on ranges.
    pub fn validated(mut self) -> Self {
        if self.total_size_in_bytes == 0 {
            warn!(
                default = DEFAULT_TOTAL_SIZE_IN_BYTES,
                "total_size_in_bytes must be at least 1, using default"
            );
            self.total_size_in_bytes = DEFAULT_TOTAL_SIZE_IN_BYTES;
        }
        if self.max_batch_size == 0 || self.max_batch_size > DEFAULT_MAX_BATCH_SIZE {
            warn!(
                value = self.max_batch_size,
                default = DEFAULT_MAX_BATCH_SIZE,
                "max_batch_size out of range, using default"
            );
            self.max_batch_size = DEFAULT_MAX_BATCH_SIZE;
        }
        if self.max_batch_count == 0 || self.max_batch_count > DEFAULT_MAX_BATCH_COUNT {
            warn!(
                value = self.max_batch_count,
                default = DEFAULT_MAX_BATCH_COUNT,
                "max_batch_count out of range, using default"
            );
            self.max_batch_count = DEFAULT_MAX_BATCH_COUNT;
        }
        if self.linger_ms < MIN_LINGER_MS {
            warn!(
                value = self.linger_ms,
                default = DEFAULT_LINGER_MS,
                "linger_ms below the 100 ms minimum, using default"
            );
            self.linger_ms = DEFAULT_LINGER_MS;
        }
        if self.max_io_worker_count == 0 {
            warn!(
                default = DEFAULT_MAX_IO_WORKER_COUNT,
                "max_io_worker_count must be at least 1, using default"
            );
            self.max_io_worker_count = DEFAULT_MAX_IO_WORKER_COUNT;
        }
        if self.base_retry_backoff_ms == 0 {
            warn!(
                default = DEFAULT_BASE_RETRY_BACKOFF_MS,
                "base_retry_backoff_ms must be at least 1, using default"
            );
            self.base_retry_backoff_ms = DEFAULT_BASE_RETRY_BACKOFF_MS;
        }
        if self.max_retry_backoff_ms < self.base_retry_backoff_ms {
            warn!(
                value = self.max_retry_backoff_ms,
                base = self.base_retry_backoff_ms,
                "max_retry_backoff_ms below base_retry_backoff_ms, correcting"
            );
            self.max_retry_backoff_ms = self.base_retry_backoff_ms.max(DEFAULT_MAX_RETRY_BACKOFF_MS);
        }
        if self.max_reserved_attempts == 0 {
            warn!(
                default = DEFAULT_MAX_RESERVED_ATTEMPTS,
                "max_reserved_attempts must be at least 1, using default"
            );
            self.max_reserved_attempts = DEFAULT_MAX_RESERVED_ATTEMPTS;
        }
        if !Self::valid_buckets(self.buckets) {
            warn!(
                value = self.buckets,
                default = DEFAULT_BUCKETS,
                "buckets must be a power of two in 1..=256, using default"
            );
            self.buckets = DEFAULT_BUCKETS;
        }
        self
    }

    pub(crate) fn valid_buckets(buckets: u32) -> bool {
        (1..=256).contains(&buckets) && buckets.is_power_of_two()
    }

    pub(crate) fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }
}
