//! Transport capability consumed by the I/O workers.
//!
//! The producer core never talks HTTP itself; it hands sealed batches to an
//! implementation of [`Transport`] and classifies the returned
//! [`SendOutcome`]. Credential handling, endpoint resolution and the actual
//! wire protocol live entirely behind this trait.

use std::time::Duration;

use async_trait::async_trait;

use crate::batch::{BatchKey, LogRecord};

/// Status of a single send as observed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
    /// The server accepted the batch.
    Ok,
    /// The server replied with a non-success HTTP status.
    Http {
        status: u16,
        /// Machine-readable server error code, e.g. `WriteQuotaExceed`.
        code: String,
        message: String,
    },
    /// The request never produced an HTTP response (connection refused,
    /// reset, timeout, DNS failure, ...).
    Transport { message: String },
}

impl SendStatus {
    /// True for the accepted case.
    pub fn is_ok(&self) -> bool {
        matches!(self, SendStatus::Ok)
    }
}

/// Result of one transport attempt.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub status: SendStatus,
    /// Wall time the attempt took, as measured by the transport.
    pub latency: Duration,
    /// Server-assigned request identifier, when one was received.
    pub request_id: Option<String>,
}

/// Capability to deliver one sealed batch to the ingestion endpoint.
///
/// Implementations must be safe for concurrent invocation; the worker pool
/// calls `send` from up to `max_io_worker_count` tasks at once. A failed
/// delivery is reported through the returned outcome, never by panicking.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `records` to the destination identified by `key`.
    async fn send(&self, key: &BatchKey, records: &[LogRecord]) -> SendOutcome;
}
