//! Timer-driven progress the admission hot path cannot make.
//!
//! A single cooperative loop seals batches whose age reached the linger
//! threshold and promotes retry entries whose backoff elapsed. On shutdown
//! it seals everything, drains the retry queue unconditionally and exits.
//! The mover performs no I/O beyond enqueueing into the dispatch queue and
//! never fails: a panicking tick is logged and the loop continues.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::accumulator::Accumulator;
use crate::retry_queue::RetryQueue;
use crate::worker::IoWorkerPool;

const TICK_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct Mover {
    accumulator: Arc<Accumulator>,
    retry_queue: Arc<RetryQueue>,
    pool: IoWorkerPool,
}

impl Mover {
    pub(crate) fn new(
        accumulator: Arc<Accumulator>,
        retry_queue: Arc<RetryQueue>,
        pool: IoWorkerPool,
    ) -> Self {
        Self {
            accumulator,
            retry_queue,
            pool,
        }
    }

    pub(crate) async fn run(self) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if self.accumulator.is_closed() {
                self.final_drain().await;
                break;
            }
            let tick = tokio::spawn(Self::tick(
                Arc::clone(&self.accumulator),
                Arc::clone(&self.retry_queue),
                self.pool.clone(),
            ));
            if let Err(join_error) = tick.await {
                if join_error.is_panic() {
                    error!(error = %join_error, "mover tick panicked");
                }
            }
        }
        info!("mover exited");
    }

    async fn tick(accumulator: Arc<Accumulator>, retry_queue: Arc<RetryQueue>, pool: IoWorkerPool) {
        let now = Instant::now();
        for batch in accumulator.seal_expired(now) {
            pool.dispatch(batch).await;
        }
        for batch in retry_queue.pop_ready(now) {
            pool.dispatch(batch).await;
        }
    }

    async fn final_drain(&self) {
        for batch in self.accumulator.seal_all() {
            self.pool.dispatch(batch).await;
        }
        for batch in self.retry_queue.close_and_drain() {
            self.pool.dispatch(batch).await;
        }
        debug!("mover drained remaining batches");
    }
}
