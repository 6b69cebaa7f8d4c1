//! End-to-end producer tests against a scripted in-memory transport.
//!
//! The mock records every batch it sees and answers each send with the
//! next scripted status (falling back to a default), which makes the seal
//! triggers, retry ladder and shutdown paths observable without a server.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use logship_producer::{
    Attempt, AttemptKind, BatchKey, Callback, LogRecord, Producer, ProducerError, SendOutcome,
    SendStatus, Transport,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone)]
struct RecordedSend {
    key: BatchKey,
    payloads: Vec<Vec<u8>>,
    at: Instant,
}

struct MockTransport {
    script: Mutex<VecDeque<SendStatus>>,
    default_status: SendStatus,
    sends: Mutex<Vec<RecordedSend>>,
    delay: Duration,
}

impl MockTransport {
    fn ok() -> Arc<Self> {
        Self::new(Vec::new(), SendStatus::Ok, Duration::ZERO)
    }

    fn scripted(script: Vec<SendStatus>) -> Arc<Self> {
        Self::new(script, SendStatus::Ok, Duration::ZERO)
    }

    fn always(status: SendStatus) -> Arc<Self> {
        Self::new(Vec::new(), status, Duration::ZERO)
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Self::new(Vec::new(), SendStatus::Ok, delay)
    }

    fn new(script: Vec<SendStatus>, default_status: SendStatus, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            default_status,
            sends: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().unwrap().clone()
    }

    fn send_count(&self) -> usize {
        self.sends.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, key: &BatchKey, records: &[LogRecord]) -> SendOutcome {
        if self.delay > Duration::ZERO {
            tokio::time::sleep(self.delay).await;
        }
        self.sends.lock().unwrap().push(RecordedSend {
            key: key.clone(),
            payloads: records.iter().map(|r| r.payload.to_vec()).collect(),
            at: Instant::now(),
        });
        let status = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_status.clone());
        SendOutcome {
            status,
            latency: Duration::from_micros(100),
            request_id: Some("mock-request".into()),
        }
    }
}

#[derive(Default)]
struct TestCallback {
    successes: AtomicUsize,
    failures: AtomicUsize,
    attempt_logs: Mutex<Vec<Vec<Attempt>>>,
    errors: Mutex<Vec<ProducerError>>,
}

impl TestCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn attempt_logs(&self) -> Vec<Vec<Attempt>> {
        self.attempt_logs.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<ProducerError> {
        self.errors.lock().unwrap().clone()
    }
}

impl Callback for TestCallback {
    fn on_success(&self, attempts: &[Attempt]) {
        self.attempt_logs.lock().unwrap().push(attempts.to_vec());
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failure(&self, attempts: &[Attempt], error: &ProducerError) {
        self.attempt_logs.lock().unwrap().push(attempts.to_vec());
        self.errors.lock().unwrap().push(error.clone());
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

/// A record whose `size_bytes()` equals `total`.
fn record_of(total: usize) -> LogRecord {
    let overhead = LogRecord::new(Vec::<u8>::new()).size_bytes();
    assert!(total >= overhead, "requested size below record overhead");
    LogRecord::new(vec![b'x'; total - overhead])
}

async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_size_seal_dispatches_the_full_batch_immediately() {
    init_tracing();
    let transport = MockTransport::ok();
    let producer = Producer::builder()
        .transport(transport.clone())
        .max_batch_size(1024)
        .linger_ms(60_000)
        .build()
        .unwrap();
    producer.start();

    let callback = TestCallback::new();
    for _ in 0..3 {
        producer
            .send(
                "proj",
                "store",
                "topic",
                "src",
                record_of(400),
                Some(callback.clone() as Arc<dyn Callback>),
            )
            .await
            .unwrap();
    }

    // The third admission overflows 1024 and seals the two-record batch
    // long before the 60 s linger.
    assert!(wait_until(Duration::from_secs(2), || transport.send_count() == 1).await);
    let sends = transport.sends();
    assert_eq!(sends[0].payloads.len(), 2);

    producer.safe_close().await;
    let sends = transport.sends();
    assert_eq!(sends.len(), 2);
    assert_eq!(sends[1].payloads.len(), 1);
    assert_eq!(callback.successes(), 3);
    assert_eq!(producer.in_flight_bytes(), 0);
}

#[tokio::test]
async fn test_age_seal_delivers_without_further_submissions() {
    let transport = MockTransport::ok();
    let producer = Producer::builder()
        .transport(transport.clone())
        .linger_ms(200)
        .build()
        .unwrap();
    producer.start();

    let callback = TestCallback::new();
    producer
        .send(
            "proj",
            "store",
            "topic",
            "src",
            LogRecord::new("hello"),
            Some(callback.clone() as Arc<dyn Callback>),
        )
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || callback.successes() == 1).await);
    assert_eq!(transport.send_count(), 1);
    producer.safe_close().await;
    assert_eq!(producer.in_flight_bytes(), 0);
}

#[tokio::test]
async fn test_retryable_failure_is_retried_after_the_backoff() {
    let transport = MockTransport::scripted(vec![SendStatus::Http {
        status: 500,
        code: "InternalServerError".into(),
        message: "server error".into(),
    }]);
    let producer = Producer::builder()
        .transport(transport.clone())
        .max_batch_count(1)
        .base_retry_backoff_ms(50)
        .build()
        .unwrap();
    producer.start();

    let callback = TestCallback::new();
    producer
        .send(
            "proj",
            "store",
            "topic",
            "src",
            LogRecord::new("retry me"),
            Some(callback.clone() as Arc<dyn Callback>),
        )
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(3), || callback.successes() == 1).await);

    let logs = callback.attempt_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].len(), 2);
    assert_eq!(logs[0][0].kind, AttemptKind::RetryableServer);
    assert_eq!(logs[0][0].http_status, Some(500));
    assert!(logs[0][1].success);

    let sends = transport.sends();
    assert_eq!(sends.len(), 2);
    assert!(sends[1].at.duration_since(sends[0].at) >= Duration::from_millis(50));

    producer.safe_close().await;
    assert_eq!(producer.in_flight_bytes(), 0);
}

#[tokio::test]
async fn test_retry_exhaustion_fails_with_the_full_attempt_log() {
    let transport = MockTransport::always(SendStatus::Http {
        status: 500,
        code: "InternalServerError".into(),
        message: "still broken".into(),
    });
    let producer = Producer::builder()
        .transport(transport.clone())
        .max_batch_count(1)
        .max_retry_times(2)
        .base_retry_backoff_ms(10)
        .build()
        .unwrap();
    producer.start();

    let callback = TestCallback::new();
    producer
        .send(
            "proj",
            "store",
            "topic",
            "src",
            LogRecord::new("doomed"),
            Some(callback.clone() as Arc<dyn Callback>),
        )
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(3), || callback.failures() == 1).await);
    assert_eq!(transport.send_count(), 3); // initial + MaxRetryTimes

    let logs = callback.attempt_logs();
    assert_eq!(logs[0].len(), 3);
    assert!(logs[0]
        .iter()
        .all(|attempt| attempt.kind == AttemptKind::RetryableServer));
    assert_eq!(
        callback.errors(),
        vec![ProducerError::RetriesExhausted { attempts: 3 }]
    );

    producer.safe_close().await;
    assert_eq!(producer.in_flight_bytes(), 0);
}

#[tokio::test]
async fn test_non_retryable_status_fails_immediately() {
    let transport = MockTransport::always(SendStatus::Http {
        status: 400,
        code: "PostBodyInvalid".into(),
        message: "bad body".into(),
    });
    let producer = Producer::builder()
        .transport(transport.clone())
        .max_batch_count(1)
        .build()
        .unwrap();
    producer.start();

    let callback = TestCallback::new();
    producer
        .send(
            "proj",
            "store",
            "topic",
            "src",
            LogRecord::new("rejected"),
            Some(callback.clone() as Arc<dyn Callback>),
        )
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || callback.failures() == 1).await);
    assert_eq!(transport.send_count(), 1);
    assert_eq!(callback.attempt_logs()[0].len(), 1);
    assert!(matches!(
        callback.errors()[0],
        ProducerError::TerminalServer { status: 400, .. }
    ));

    producer.safe_close().await;
}

#[tokio::test]
async fn test_no_retry_status_list_forces_terminal() {
    let transport = MockTransport::always(SendStatus::Http {
        status: 500,
        code: "InternalServerError".into(),
        message: "would normally retry".into(),
    });
    let producer = Producer::builder()
        .transport(transport.clone())
        .max_batch_count(1)
        .no_retry_status_code_list(vec![500])
        .build()
        .unwrap();
    producer.start();

    let callback = TestCallback::new();
    producer
        .send(
            "proj",
            "store",
            "topic",
            "src",
            LogRecord::new("no retry"),
            Some(callback.clone() as Arc<dyn Callback>),
        )
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || callback.failures() == 1).await);
    assert_eq!(transport.send_count(), 1);

    producer.safe_close().await;
}

#[tokio::test]
async fn test_quota_exceeded_403_is_retried() {
    let transport = MockTransport::scripted(vec![SendStatus::Http {
        status: 403,
        code: "WriteQuotaExceed".into(),
        message: "write quota exceeded".into(),
    }]);
    let producer = Producer::builder()
        .transport(transport.clone())
        .max_batch_count(1)
        .base_retry_backoff_ms(20)
        .build()
        .unwrap();
    producer.start();

    let callback = TestCallback::new();
    producer
        .send(
            "proj",
            "store",
            "topic",
            "src",
            LogRecord::new("throttled"),
            Some(callback.clone() as Arc<dyn Callback>),
        )
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(3), || callback.successes() == 1).await);
    assert_eq!(transport.send_count(), 2);

    producer.safe_close().await;
}

#[tokio::test]
async fn test_backpressure_rejects_after_the_bounded_wait() {
    let transport = MockTransport::ok();
    let producer = Producer::builder()
        .transport(transport.clone())
        .total_size_in_bytes(1024)
        .max_block_sec(1)
        .build()
        .unwrap();
    // Not started: nothing consumes, so the budget stays occupied.

    producer
        .send("proj", "store", "topic", "src", record_of(1000), None)
        .await
        .unwrap();

    let started = Instant::now();
    let result = producer
        .send("proj", "store", "topic", "src", record_of(1000), None)
        .await;
    assert_eq!(result, Err(ProducerError::MemoryExhausted));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(900), "waited {waited:?}");
    assert_eq!(producer.monitor().memory_wait_failures, 1);

    // Close drains the admitted record even though start() never ran.
    producer.safe_close().await;
    assert_eq!(transport.send_count(), 1);
    assert_eq!(producer.in_flight_bytes(), 0);
}

#[tokio::test]
async fn test_per_key_order_is_preserved_across_batches() {
    let transport = MockTransport::ok();
    let producer = Producer::builder()
        .transport(transport.clone())
        .max_batch_count(2)
        .max_io_worker_count(1)
        .linger_ms(60_000)
        .build()
        .unwrap();
    producer.start();

    let submitted: Vec<Vec<u8>> = (0..5).map(|i| format!("record-{i}").into_bytes()).collect();
    for payload in &submitted {
        producer
            .send(
                "proj",
                "store",
                "topic",
                "src",
                LogRecord::new(payload.clone()),
                None,
            )
            .await
            .unwrap();
    }
    producer.safe_close().await;

    let observed: Vec<Vec<u8>> = transport
        .sends()
        .into_iter()
        .flat_map(|send| send.payloads)
        .collect();
    assert_eq!(observed, submitted);
    assert!(transport
        .sends()
        .iter()
        .all(|send| send.payloads.len() <= 2));
}

#[tokio::test]
async fn test_adjusted_hashes_share_one_batch() {
    let transport = MockTransport::ok();
    let producer = Producer::builder()
        .transport(transport.clone())
        .buckets(4)
        .build()
        .unwrap();

    // Both hashes land in the first of four buckets.
    producer
        .hash_send(
            "proj",
            "store",
            "3fffffffffffffffffffffffffffffff",
            "topic",
            "src",
            LogRecord::new("a"),
            None,
        )
        .await
        .unwrap();
    producer
        .hash_send(
            "proj",
            "store",
            "00000000000000000000000000000001",
            "topic",
            "src",
            LogRecord::new("b"),
            None,
        )
        .await
        .unwrap();

    producer.safe_close().await;
    let sends = transport.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].payloads.len(), 2);
    assert_eq!(
        sends[0].key.shard_hash.as_deref(),
        Some("00000000000000000000000000000000")
    );
}

#[tokio::test]
async fn test_admission_validation_errors() {
    let transport = MockTransport::ok();
    let producer = Producer::builder()
        .transport(transport.clone())
        .max_batch_size(1024)
        .max_batch_count(4)
        .build()
        .unwrap();

    // Malformed routing hash.
    let result = producer
        .hash_send(
            "proj",
            "store",
            "not-hex!",
            "topic",
            "src",
            LogRecord::new("x"),
            None,
        )
        .await;
    assert!(matches!(result, Err(ProducerError::InvalidArgument(_))));

    // A single record above the batch cap.
    let result = producer
        .send("proj", "store", "topic", "src", record_of(2048), None)
        .await;
    assert!(matches!(result, Err(ProducerError::InvalidArgument(_))));

    // A list above the record-count cap.
    let records: Vec<LogRecord> = (0..5).map(|_| LogRecord::new("r")).collect();
    let result = producer
        .send_list("proj", "store", "topic", "src", records, None)
        .await;
    assert!(matches!(result, Err(ProducerError::BatchSizeExceeded(_))));

    // An empty list.
    let result = producer
        .send_list("proj", "store", "topic", "src", Vec::new(), None)
        .await;
    assert!(matches!(result, Err(ProducerError::InvalidArgument(_))));

    producer.safe_close().await;
    assert_eq!(transport.send_count(), 0);
    assert_eq!(producer.in_flight_bytes(), 0);
}

#[tokio::test]
async fn test_bounded_close_cancels_undelivered_batches() {
    init_tracing();
    let transport = MockTransport::slow(Duration::from_millis(800));
    let producer = Producer::builder()
        .transport(transport.clone())
        .max_batch_count(1)
        .max_io_worker_count(1)
        .build()
        .unwrap();
    producer.start();

    let first = TestCallback::new();
    let second = TestCallback::new();
    producer
        .send(
            "proj",
            "store-a",
            "topic",
            "src",
            LogRecord::new("slow"),
            Some(first.clone() as Arc<dyn Callback>),
        )
        .await
        .unwrap();
    producer
        .send(
            "proj",
            "store-b",
            "topic",
            "src",
            LogRecord::new("stuck"),
            Some(second.clone() as Arc<dyn Callback>),
        )
        .await
        .unwrap();

    // The single worker is busy with the first batch for 800 ms; the
    // second batch never leaves the queue within the close budget.
    let result = producer.close(300).await;
    assert_eq!(result, Err(ProducerError::Timeout));
    assert_eq!(second.failures(), 1);
    assert_eq!(second.errors(), vec![ProducerError::Cancelled]);

    // The in-flight batch still completes in the background.
    assert!(wait_until(Duration::from_secs(3), || first.successes() == 1).await);
}

#[tokio::test]
async fn test_close_is_idempotent_and_rejects_later_sends() {
    let transport = MockTransport::ok();
    let producer = Producer::builder()
        .transport(transport.clone())
        .build()
        .unwrap();
    producer.start();
    producer.start(); // second start is a no-op

    producer
        .send("proj", "store", "topic", "src", LogRecord::new("x"), None)
        .await
        .unwrap();

    producer.safe_close().await;
    producer.safe_close().await; // no-op

    let result = producer
        .send("proj", "store", "topic", "src", LogRecord::new("y"), None)
        .await;
    assert_eq!(result, Err(ProducerError::ProducerClosed));

    assert_eq!(transport.send_count(), 1);
    assert_eq!(producer.in_flight_bytes(), 0);
    let snapshot = producer.monitor();
    assert_eq!(snapshot.batches_sent, 1);
    assert_eq!(snapshot.records_sent, 1);
}
