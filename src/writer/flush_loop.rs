use super::{AsyncConfig, WriterCommand, WriterCounters};
use crate::sink::SharedSink;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Records drained from the channel but not yet handed to the inner sink.
struct Pending {
    buf: Vec<u8>,
    records: u64,
}

pub(super) async fn flush_loop(
    mut rx: mpsc::Receiver<WriterCommand>,
    inner: SharedSink,
    config: AsyncConfig,
    counters: Arc<WriterCounters>,
    shutdown_token: CancellationToken,
) {
    let threshold = config.buffer_size as u64;
    let mut pending = Pending {
        buf: Vec::new(),
        records: 0,
    };
    let mut ticker = interval_at(Instant::now() + config.flush_interval, config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        capacity = config.buffer_size,
        on_full = config.on_full.as_str(),
        "Async writer flush loop started"
    );

    loop {
        tokio::select! {
            biased;

            () = shutdown_token.cancelled() => {
                if config.flush_on_exit {
                    let mut acks = Vec::new();
                    while let Ok(command) = rx.try_recv() {
                        match command {
                            WriterCommand::Write(record) => pending.push(&record),
                            WriterCommand::Flush(ack) => acks.push(ack),
                        }
                    }
                    flush_pending(&inner, &mut pending, &counters).await;
                    for ack in acks {
                        let _ = ack.send(());
                    }
                } else if pending.records > 0 {
                    debug!(records = pending.records, "Discarding buffered records on exit");
                }
                break;
            }

            command = rx.recv() => match command {
                Some(WriterCommand::Write(record)) => {
                    pending.push(&record);
                    if pending.records >= threshold {
                        flush_pending(&inner, &mut pending, &counters).await;
                    }
                }
                Some(WriterCommand::Flush(ack)) => {
                    flush_requested(&inner, &mut pending, &counters, ack).await;
                }
                None => {
                    flush_pending(&inner, &mut pending, &counters).await;
                    break;
                }
            },

            _ = ticker.tick() => {
                flush_pending(&inner, &mut pending, &counters).await;
            }
        }
    }

    rx.close();
    info!("Async writer flush loop stopped");
}

impl Pending {
    fn push(&mut self, record: &[u8]) {
        self.buf.extend_from_slice(record);
        self.records += 1;
    }
}

async fn flush_requested(
    inner: &SharedSink,
    pending: &mut Pending,
    counters: &WriterCounters,
    ack: oneshot::Sender<()>,
) {
    flush_pending(inner, pending, counters).await;
    if let Err(e) = inner.flush().await {
        counters.write_errors.fetch_add(1, Ordering::Relaxed);
        warn!(error = %e, "Inner sink flush failed");
    }
    let _ = ack.send(());
}

async fn flush_pending(inner: &SharedSink, pending: &mut Pending, counters: &WriterCounters) {
    if pending.records == 0 {
        return;
    }

    match inner.write(&pending.buf).await {
        Ok(_) => {
            counters.flushes.fetch_add(1, Ordering::Relaxed);
            counters.delivered.fetch_add(pending.records, Ordering::Relaxed);
        }
        Err(e) => {
            counters.write_errors.fetch_add(1, Ordering::Relaxed);
            warn!(
                records = pending.records,
                bytes = pending.buf.len(),
                error = %e,
                "Async writer flush failed"
            );
        }
    }

    pending.buf.clear();
    pending.records = 0;
}
