//! Client-side asynchronous log producer.
//!
//! Buffers structured log records in memory and ships them to a remote
//! ingestion endpoint in large destination-keyed batches with
//! at-least-once delivery. Callers get control back immediately; delivery
//! happens later under a global memory budget, with per-destination
//! ordering, deadline-driven flushing and capped exponential-backoff
//! retries.
//!
//! # Pipeline
//!
//! ```text
//! caller → Accumulator ──(sealed batch)──► dispatch queue ──► worker pool ──► Transport
//!              ▲                                                  │
//!              │                                                  ▼
//!              └───────────────── retry queue ◄────── failed (retryable)
//!                                      │
//!                                    mover (timer loop)
//! ```
//!
//! The crate deliberately stops at the [`Transport`] seam: HTTP, signing
//! and credentials are the caller's concern.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use logship_producer::{LogRecord, Producer};
//!
//! let transport: Arc<dyn logship_producer::Transport> = Arc::new(MyHttpTransport::new(endpoint));
//! let producer = Producer::builder().transport(transport).build()?;
//! producer.start();
//!
//! producer
//!     .send("my-project", "app-logs", "checkout", "host-1",
//!           LogRecord::new("payload bytes"), None)
//!     .await?;
//!
//! producer.safe_close().await;
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod monitor;
pub mod producer;
pub mod retry;
pub mod shard_hash;
pub mod transport;

mod accumulator;
mod memory;
mod mover;
mod retry_queue;
mod worker;

pub use batch::{Attempt, AttemptKind, BatchKey, Callback, LogRecord};
pub use config::ProducerConfig;
pub use error::{ProducerError, Result};
pub use monitor::{MonitorSnapshot, ProducerMonitor};
pub use producer::{Producer, ProducerBuilder};
pub use retry::RetryPolicy;
pub use shard_hash::adjust_shard_hash;
pub use transport::{SendOutcome, SendStatus, Transport};
