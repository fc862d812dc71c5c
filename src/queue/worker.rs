use super::QueueShared;
use crate::buffer::{Batch, BatchType};
use crate::sink::{DeliveryFailure, SinkError};
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, sleep_until};
use tracing::{debug, trace, warn};

pub(super) type SharedReceiver = Arc<Mutex<mpsc::Receiver<Bytes>>>;

/// One worker: pull records from the shared channel into a private batch and
/// flush it on size, age, or tick. Exits once the channel is closed and empty.
pub(super) async fn run_worker(id: usize, rx: SharedReceiver, shared: Arc<QueueShared>) {
    let config = &shared.config;
    let mut batch = Batch::with_capacity(config.batch_size);
    let mut ticker = interval_at(Instant::now() + config.flush_interval, config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(worker = id, "Write queue worker started");

    loop {
        let deadline = batch.deadline(config.max_batch_wait);

        tokio::select! {
            record = recv_shared(&rx) => match record {
                Some(record) => {
                    batch.push(record);
                    if batch.len() >= config.batch_size {
                        flush_batch(id, &shared, &mut batch, BatchType::SizeBased).await;
                    }
                }
                None => {
                    flush_batch(id, &shared, &mut batch, BatchType::Shutdown).await;
                    break;
                }
            },

            _ = ticker.tick() => {
                flush_batch(id, &shared, &mut batch, BatchType::TimeBased).await;
            }

            () = wait_for_deadline(deadline) => {
                flush_batch(id, &shared, &mut batch, BatchType::TimeBased).await;
            }
        }
    }

    debug!(worker = id, "Write queue worker stopped");
}

// The lock is only held while this future is alive; losing a select race
// drops it and lets another worker receive.
async fn recv_shared(rx: &SharedReceiver) -> Option<Bytes> {
    rx.lock().await.recv().await
}

async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn flush_batch(worker: usize, shared: &QueueShared, batch: &mut Batch, reason: BatchType) {
    if batch.is_empty() {
        return;
    }

    let records = batch.len() as u64;
    let payload = batch.concat_into(&shared.pool);

    match write_with_retry(shared, &payload).await {
        Ok(()) => {
            shared.counters.batches_flushed.fetch_add(1, Ordering::Relaxed);
            shared.counters.records_flushed.fetch_add(records, Ordering::Relaxed);
            trace!(worker, records, bytes = payload.len(), ?reason, "Flushed batch");
        }
        Err(e) => {
            shared.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
            shared.counters.records_dropped.fetch_add(records, Ordering::Relaxed);
            warn!(
                worker,
                records,
                bytes = payload.len(),
                error = %e,
                "Dropping batch after exhausting retries"
            );
        }
    }

    shared.pool.release(payload);
    batch.clear();
}

/// Deliver `payload`, retrying with linear backoff.
///
/// Makes at most `retry_count + 1` attempts, sleeping
/// `retry_interval * attempt` after each failed one. Permanent errors end the
/// loop early. The error handler sees every failure; the last error is
/// returned once attempts run out.
pub(super) async fn write_with_retry(shared: &QueueShared, payload: &[u8]) -> Result<(), SinkError> {
    let max_attempts = shared.retry.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match shared.sink.write(payload).await {
            Ok(_) => return Ok(()),
            Err(error) => {
                let exhausted = attempt >= max_attempts || !error.is_transient();
                if let Some(handler) = &shared.error_handler {
                    handler(&DeliveryFailure {
                        error: &error,
                        attempt,
                        bytes: payload.len(),
                        exhausted,
                    });
                }
                if exhausted {
                    return Err(error);
                }

                let delay = shared.retry.delay_for(attempt);
                debug!(attempt, ?delay, error = %error, "Batch write failed, retrying");
                shared.counters.retries.fetch_add(1, Ordering::Relaxed);
                sleep(delay).await;
            }
        }
    }
}
