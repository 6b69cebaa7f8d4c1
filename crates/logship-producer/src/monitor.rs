//! Runtime counters and timing aggregates.
//!
//! Counters are plain atomics updated from the hot paths; `snapshot` takes
//! a consistent-enough point-in-time copy for reporting. Unless disabled in
//! the configuration, the producer runs a background task that logs a
//! snapshot once a minute.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

/// How often the report task logs a snapshot.
pub(crate) const REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub struct ProducerMonitor {
    batches_sent: AtomicU64,
    batches_failed: AtomicU64,
    records_sent: AtomicU64,
    records_failed: AtomicU64,
    retries: AtomicU64,
    send_count: AtomicU64,
    send_latency_total_us: AtomicU64,
    memory_waits: AtomicU64,
    memory_wait_failures: AtomicU64,
    memory_wait_total_us: AtomicU64,
}

impl ProducerMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_success(&self, record_count: u64) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.records_sent.fetch_add(record_count, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, record_count: u64) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.records_failed.fetch_add(record_count, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_latency(&self, latency: Duration) {
        self.send_count.fetch_add(1, Ordering::Relaxed);
        self.send_latency_total_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_memory_wait(&self, waited: Duration) {
        self.memory_waits.fetch_add(1, Ordering::Relaxed);
        self.memory_wait_total_us
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_memory_wait_failure(&self) {
        self.memory_wait_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            records_sent: self.records_sent.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            send_count: self.send_count.load(Ordering::Relaxed),
            send_latency_total_us: self.send_latency_total_us.load(Ordering::Relaxed),
            memory_waits: self.memory_waits.load(Ordering::Relaxed),
            memory_wait_failures: self.memory_wait_failures.load(Ordering::Relaxed),
            memory_wait_total_us: self.memory_wait_total_us.load(Ordering::Relaxed),
        }
    }

    /// Spawn the periodic runtime-metrics report loop.
    pub(crate) fn spawn_report_task(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; skip it so the first
            // report carries a full interval of data.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = self.snapshot();
                info!(
                    batches_sent = snapshot.batches_sent,
                    batches_failed = snapshot.batches_failed,
                    records_sent = snapshot.records_sent,
                    records_failed = snapshot.records_failed,
                    retries = snapshot.retries,
                    avg_send_latency_us = snapshot.avg_send_latency().as_micros() as u64,
                    memory_waits = snapshot.memory_waits,
                    memory_wait_failures = snapshot.memory_wait_failures,
                    "producer runtime metrics"
                );
            }
        })
    }
}

/// Serializable snapshot of [`ProducerMonitor`] counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MonitorSnapshot {
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub records_sent: u64,
    pub records_failed: u64,
    pub retries: u64,
    pub send_count: u64,
    pub send_latency_total_us: u64,
    pub memory_waits: u64,
    pub memory_wait_failures: u64,
    pub memory_wait_total_us: u64,
}

impl MonitorSnapshot {
    /// Mean transport latency across all attempts so far.
    pub fn avg_send_latency(&self) -> Duration {
        if self.send_count == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.send_latency_total_us / self.send_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let monitor = ProducerMonitor::new();
        monitor.record_success(10);
        monitor.record_success(5);
        monitor.record_failure(2);
        monitor.record_retry();
        monitor.record_send_latency(Duration::from_micros(100));
        monitor.record_send_latency(Duration::from_micros(300));

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.batches_sent, 2);
        assert_eq!(snapshot.records_sent, 15);
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.records_failed, 2);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.avg_send_latency(), Duration::from_micros(200));
    }

    #[test]
    fn test_empty_snapshot_has_zero_latency() {
        let snapshot = ProducerMonitor::new().snapshot();
        assert_eq!(snapshot.avg_send_latency(), Duration::ZERO);
    }
}
