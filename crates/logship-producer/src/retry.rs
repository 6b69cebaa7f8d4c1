//! Failure classification and exponential backoff.
//!
//! Retryable conditions, exactly: transport I/O errors, HTTP status >= 500,
//! and 403 responses carrying a write-quota marker. Any status listed in
//! `no_retry_status_code_list` is forced non-retryable regardless.

use std::collections::HashSet;
use std::time::Duration;

use crate::batch::AttemptKind;
use crate::config::ProducerConfig;
use crate::transport::SendStatus;

/// Server code / message fragment identifying a write-quota rejection,
/// which is retryable even though it arrives as a 403.
const WRITE_QUOTA_MARKER: &str = "WriteQuotaExceed";

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retry_times: usize,
    base_backoff: Duration,
    max_backoff: Duration,
    no_retry_status_codes: HashSet<u16>,
}

impl RetryPolicy {
    pub fn new(
        max_retry_times: usize,
        base_backoff: Duration,
        max_backoff: Duration,
        no_retry_status_codes: impl IntoIterator<Item = u16>,
    ) -> Self {
        Self {
            max_retry_times,
            base_backoff,
            max_backoff,
            no_retry_status_codes: no_retry_status_codes.into_iter().collect(),
        }
    }

    pub(crate) fn from_config(config: &ProducerConfig) -> Self {
        Self::new(
            config.max_retry_times,
            Duration::from_millis(config.base_retry_backoff_ms),
            Duration::from_millis(config.max_retry_backoff_ms),
            config.no_retry_status_code_list.iter().copied(),
        )
    }

    pub fn max_retry_times(&self) -> usize {
        self.max_retry_times
    }

    /// Classify a transport outcome.
    ///
    /// # Arguments
    ///
    /// * `status` - Status the transport reported for one attempt
    ///
    /// # Returns
    ///
    /// The [`AttemptKind`] recorded in the batch's attempt log and used to
    /// decide between success, retry and terminal failure.
    ///
    /// # Retryable
    ///
    /// - Transport I/O errors (connection refused, reset, timeout)
    /// - HTTP status >= 500
    /// - HTTP 403 whose code or message carries the write-quota marker
    ///
    /// # Non-Retryable
    ///
    /// - Any status in `no_retry_status_code_list` (checked first)
    /// - Every other HTTP status, e.g. 400 or a plain 403
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let kind = policy.classify(&SendStatus::Http {
    ///     status: 503,
    ///     code: "ServerBusy".into(),
    ///     message: "busy".into(),
    /// });
    /// assert_eq!(kind, AttemptKind::RetryableServer);
    /// ```
    pub fn classify(&self, status: &SendStatus) -> AttemptKind {
        match status {
            SendStatus::Ok => AttemptKind::Success,
            SendStatus::Transport { .. } => AttemptKind::RetryableTransport,
            SendStatus::Http {
                status,
                code,
                message,
            } => {
                if self.no_retry_status_codes.contains(status) {
                    AttemptKind::TerminalServer
                } else if *status >= 500 {
                    AttemptKind::RetryableServer
                } else if *status == 403
                    && (code.contains(WRITE_QUOTA_MARKER) || message.contains(WRITE_QUOTA_MARKER))
                {
                    AttemptKind::RetryableServer
                } else {
                    AttemptKind::TerminalServer
                }
            }
        }
    }

    /// Delay before the `retry`-th retry.
    ///
    /// # Arguments
    ///
    /// * `retry` - 1-based retry number (1 for the first retry)
    ///
    /// # Returns
    ///
    /// `min(base * 2^(retry-1), max)`; the shift is clamped so large retry
    /// numbers saturate at the ceiling instead of overflowing.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // base 100 ms, ceiling 50 s
    /// assert_eq!(policy.backoff(1), Duration::from_millis(100));
    /// assert_eq!(policy.backoff(2), Duration::from_millis(200));
    /// assert_eq!(policy.backoff(3), Duration::from_millis(400));
    /// assert_eq!(policy.backoff(60), Duration::from_millis(50_000));
    /// ```
    pub fn backoff(&self, retry: usize) -> Duration {
        let shift = retry.saturating_sub(1).min(31) as u32;
        let base_ms = self.base_backoff.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay_ms.min(self.max_backoff.as_millis() as u64))
    }
}
