//! Error types for producer operations.
//!
//! Admission problems (`MemoryExhausted`, `BatchSizeExceeded`,
//! `InvalidArgument`, `ProducerClosed`) are returned synchronously from the
//! send APIs. Delivery outcomes, including retry exhaustion, are reported
//! through the [`Callback`](crate::batch::Callback) attached at submission
//! time and never through any other channel.
//!
//! ## Examples
//!
//! ```ignore
//! use logship_producer::{LogRecord, ProducerError};
//!
//! match producer.send("proj", "store", "topic", "src", record, None).await {
//!     Ok(()) => {}
//!     Err(ProducerError::MemoryExhausted) => {
//!         eprintln!("producer is backlogged, dropping record");
//!     }
//!     Err(ProducerError::ProducerClosed) => {
//!         eprintln!("submission after shutdown");
//!     }
//!     Err(e) => eprintln!("error: {}", e),
//! }
//! ```

use thiserror::Error;

/// Convenience type alias for `Result<T, ProducerError>`.
///
/// This is the standard Result type used throughout the producer library.
/// All public APIs return this type for consistent error handling.
pub type Result<T> = std::result::Result<T, ProducerError>;

/// Errors surfaced to callers and failure callbacks.
///
/// ## Error Categories
///
/// - **Admission**: `MemoryExhausted`, `BatchSizeExceeded`,
///   `InvalidArgument`, `ProducerClosed`
/// - **Shutdown**: `Timeout`, `Cancelled`
/// - **Delivery (callback-only)**: `RetriesExhausted`, `TerminalServer`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProducerError {
    /// Admission refused: the global memory budget stayed exhausted for the
    /// whole configured wait.
    ///
    /// ## Causes
    /// - Submission rate exceeds what the transport can drain
    /// - The endpoint is slow or down, so retries hold memory for longer
    /// - `total_size_in_bytes` is configured too small for the workload
    ///
    /// ## Resolution
    /// - Raise `total_size_in_bytes` or `max_block_sec`
    /// - Slow the submission rate, or drop/spool records on this error
    /// - Check transport health if the budget never frees up
    #[error("memory budget exhausted: admission wait elapsed")]
    MemoryExhausted,

    /// Malformed routing hash, bad bucket count, oversize single record, or
    /// an otherwise unusable argument.
    ///
    /// ## Causes
    /// - A routing hash that is empty, longer than 32 digits, or not hex
    /// - A bucket count that is not a power of two in `1..=256`
    /// - A single record larger than `max_batch_size`
    /// - An empty record list
    ///
    /// ## Resolution
    /// - Validate routing hashes before submission
    /// - Split or truncate oversize records at the call site
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A single submitted record list already exceeds the per-batch caps.
    ///
    /// ## Causes
    /// - More records in one list than `max_batch_count`
    /// - A list whose aggregate size exceeds `max_batch_size`
    ///
    /// ## Resolution
    /// - Split the list into smaller submissions; records submitted
    ///   together must fit in one batch because they are never split
    #[error("record list exceeds batch limits: {0}")]
    BatchSizeExceeded(String),

    /// Submission after shutdown started.
    ///
    /// ## Causes
    /// - `close()` or `safe_close()` was already called
    /// - A racing task submitted while another task drove the shutdown
    ///
    /// ## Resolution
    /// - Stop submitting before closing, or treat this error as the signal
    ///   to stop
    #[error("producer is closed")]
    ProducerClosed,

    /// Bounded close elapsed with batches still in flight.
    ///
    /// ## Causes
    /// - In-flight sends slower than the `close(timeout_ms)` budget
    /// - A backlog of sealed batches at shutdown time
    ///
    /// ## Resolution
    /// - Use a larger timeout or `safe_close()` when losing records is not
    ///   acceptable
    /// - Batches that never reached a worker get failure callbacks with
    ///   `Cancelled`
    #[error("close timed out with batches still in flight")]
    Timeout,

    /// The batch never completed because the producer shut down.
    ///
    /// ## Causes
    /// - A bounded close expired while the batch was still queued
    /// - A retryable failure occurred after shutdown started, so the retry
    ///   was abandoned
    ///
    /// ## Resolution
    /// - Re-submit through a new producer if delivery is still required;
    ///   the attempt log on the callback shows how far the batch got
    #[error("batch cancelled by shutdown")]
    Cancelled,

    /// Every allowed attempt failed with a retryable error; the attempt log
    /// passed to the failure callback holds the per-attempt detail.
    ///
    /// ## Causes
    /// - The endpoint stayed unavailable (5xx, I/O errors) across
    ///   `max_retry_times + 1` attempts
    /// - A persistent write-quota rejection
    ///
    /// ## Resolution
    /// - Inspect the attempt log for the recurring error
    /// - Raise `max_retry_times`/`max_retry_backoff_ms` to ride out longer
    ///   outages
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: usize },

    /// Non-retryable server response, e.g. a 4xx other than a write-quota
    /// rejection.
    ///
    /// ## Causes
    /// - Malformed payload (`400`), missing resource (`404`)
    /// - Authentication or authorization failure (`401`, `403` without a
    ///   quota code)
    /// - A status listed in `no_retry_status_code_list`
    ///
    /// ## Resolution
    /// - Fix the request, credentials or destination; retrying would fail
    ///   the same way
    #[error("server rejected the batch: status {status} {code}: {message}")]
    TerminalServer {
        status: u16,
        code: String,
        message: String,
    },
}
