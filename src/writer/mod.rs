//! Non-blocking front door over any sink.
//!
//! `write` copies the record onto a bounded channel and returns. A background
//! task drains the channel and hands concatenated chunks to the inner sink,
//! either when `buffer_size` records have accumulated or on the flush tick.

pub mod config;
mod flush_loop;

pub use config::AsyncConfig;

use crate::buffer::{BackpressureLevel, OnFullPolicy};
use crate::config::ConfigError;
use crate::sink::{LogSink, SharedSink, SinkError, SinkFuture};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub(crate) enum WriterCommand {
    Write(Bytes),
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
pub(crate) struct WriterCounters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    flushes: AtomicU64,
    write_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AsyncWriterStats {
    pub accepted: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub flushes: u64,
    pub write_errors: u64,
}

pub struct AsyncWriter {
    inner: SharedSink,
    config: AsyncConfig,
    sender: RwLock<Option<mpsc::Sender<WriterCommand>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_token: CancellationToken,
    counters: Arc<WriterCounters>,
    stopped: AtomicBool,
}

impl AsyncWriter {
    /// Wrap `inner` and spawn the flush loop. Must be called inside a tokio
    /// runtime when `config.enabled` is set.
    pub fn new(inner: SharedSink, config: AsyncConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let counters = Arc::new(WriterCounters::default());
        let shutdown_token = CancellationToken::new();

        let (sender, task) = if config.enabled {
            let (tx, rx) = mpsc::channel(config.buffer_size);
            let task = tokio::spawn(flush_loop::flush_loop(
                rx,
                inner.clone(),
                config.clone(),
                counters.clone(),
                shutdown_token.clone(),
            ));
            (Some(tx), Some(task))
        } else {
            (None, None)
        };

        Ok(Self {
            inner,
            config,
            sender: RwLock::new(sender),
            task: Mutex::new(task),
            shutdown_token,
            counters,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &AsyncConfig {
        &self.config
    }

    /// Accept a record without waiting on I/O.
    ///
    /// With `on_full = drop` a full channel counts the write as dropped and
    /// still reports success. With `on_full = block` the call waits for room.
    pub async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        if !self.config.enabled {
            return self.inner.write(data).await;
        }

        let Some(tx) = self.sender.read().clone() else {
            return Err(SinkError::Closed);
        };

        let command = WriterCommand::Write(Bytes::copy_from_slice(data));
        match tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => match self.config.on_full {
                OnFullPolicy::Drop => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    return Ok(data.len());
                }
                OnFullPolicy::Block => {
                    tx.send(command).await.map_err(|_| SinkError::Closed)?;
                }
            },
            Err(TrySendError::Closed(_)) => return Err(SinkError::Closed),
        }

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(data.len())
    }

    /// Deliver everything enqueued so far and flush the inner sink.
    pub async fn flush(&self) -> Result<(), SinkError> {
        if !self.config.enabled {
            return self.inner.flush().await;
        }

        let Some(tx) = self.sender.read().clone() else {
            return Err(SinkError::Closed);
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(WriterCommand::Flush(ack_tx))
            .await
            .map_err(|_| SinkError::Closed)?;
        ack_rx.await.map_err(|_| SinkError::Closed)
    }

    /// Stop the flush loop, then close the inner sink. Later calls are no-ops.
    pub async fn stop(&self) -> Result<(), SinkError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        drop(self.sender.write().take());
        self.shutdown_token.cancel();

        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!(error = %e, "Async writer flush loop terminated abnormally");
        }

        let stats = self.stats();
        info!(
            accepted = stats.accepted,
            dropped = stats.dropped,
            write_errors = stats.write_errors,
            "Async writer stopped"
        );

        self.inner.close().await
    }

    /// Cumulative writes discarded under the drop policy.
    pub fn drop_count(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn backpressure(&self) -> BackpressureLevel {
        match self.sender.read().as_ref() {
            Some(tx) => {
                let used = tx.max_capacity() - tx.capacity();
                BackpressureLevel::from_fill_ratio(used as f64 / tx.max_capacity() as f64)
            }
            None => BackpressureLevel::None,
        }
    }

    pub fn stats(&self) -> AsyncWriterStats {
        let c = &self.counters;
        AsyncWriterStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
            write_errors: c.write_errors.load(Ordering::Relaxed),
        }
    }
}

impl LogSink for AsyncWriter {
    fn write<'a>(&'a self, data: &'a [u8]) -> SinkFuture<'a, usize> {
        Box::pin(AsyncWriter::write(self, data))
    }

    fn flush(&self) -> SinkFuture<'_, ()> {
        Box::pin(AsyncWriter::flush(self))
    }

    fn close(&self) -> SinkFuture<'_, ()> {
        Box::pin(self.stop())
    }
}

impl Drop for AsyncWriter {
    fn drop(&mut self) {
        if !self.stopped.load(Ordering::Acquire) {
            self.shutdown_token.cancel();
        }
    }
}

impl std::fmt::Debug for AsyncWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncWriter")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
