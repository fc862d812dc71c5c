//! Worker-pool write queue.
//!
//! Producers enqueue records on one bounded channel shared by N workers.
//! Each worker batches what it receives and delivers batches to the wrapped
//! sink with linear-backoff retries. Delivery failures after enqueue are only
//! visible through the error handler and [`QueueStats`].
//!
//! ```text
//! write() --try_send--> [bounded channel] --> worker 0..N --batch--> sink
//! ```

pub mod config;
mod worker;

pub use config::QueueConfig;

use crate::buffer::BufferPool;
use crate::config::ConfigError;
use crate::reliability::RetryPolicy;
use crate::sink::{ErrorHandler, LogSink, SharedSink, SinkError, SinkFuture};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueueState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl QueueState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => QueueState::Created,
            1 => QueueState::Running,
            2 => QueueState::Stopping,
            _ => QueueState::Stopped,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub rejected: u64,
    pub batches_flushed: u64,
    pub records_flushed: u64,
    pub retries: u64,
    pub failed_batches: u64,
    pub records_dropped: u64,
}

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    rejected: AtomicU64,
    batches_flushed: AtomicU64,
    records_flushed: AtomicU64,
    retries: AtomicU64,
    failed_batches: AtomicU64,
    records_dropped: AtomicU64,
}

/// State shared between the queue handle and its workers.
pub(crate) struct QueueShared {
    sink: SharedSink,
    config: QueueConfig,
    retry: RetryPolicy,
    pool: BufferPool,
    counters: QueueCounters,
    error_handler: Option<ErrorHandler>,
}

pub struct WriteQueue {
    shared: Arc<QueueShared>,
    state: AtomicU8,
    stop_requested: AtomicBool,
    sender: RwLock<Option<mpsc::Sender<Bytes>>>,
    receiver: Mutex<Option<mpsc::Receiver<Bytes>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WriteQueue {
    /// Validates `config`; nothing is spawned until [`WriteQueue::start`].
    pub fn new(sink: SharedSink, config: QueueConfig) -> Result<Self, ConfigError> {
        Self::with_error_handler(sink, config, None)
    }

    pub fn with_error_handler(
        sink: SharedSink,
        config: QueueConfig,
        error_handler: Option<ErrorHandler>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.max_queue_size);
        let retry = RetryPolicy::linear(config.retry_count, config.retry_interval);
        let pool = BufferPool::new(config.worker_count * 2, crate::buffer::pool::DEFAULT_BUFFER_CAPACITY);

        Ok(Self {
            shared: Arc::new(QueueShared {
                sink,
                config,
                retry,
                pool,
                counters: QueueCounters::default(),
                error_handler,
            }),
            state: AtomicU8::new(QueueState::Created as u8),
            stop_requested: AtomicBool::new(false),
            sender: RwLock::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn state(&self) -> QueueState {
        QueueState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Spawn the worker pool. Only valid once, from `Created`.
    pub fn start(&self) -> Result<(), SinkError> {
        self.state
            .compare_exchange(
                QueueState::Created as u8,
                QueueState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| SinkError::InvalidState("write queue can only be started once"))?;

        let rx = self
            .receiver
            .lock()
            .take()
            .ok_or(SinkError::InvalidState("write queue receiver already taken"))?;
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = self.workers.lock();
        for id in 0..self.shared.config.worker_count {
            workers.push(tokio::spawn(worker::run_worker(
                id,
                rx.clone(),
                self.shared.clone(),
            )));
        }

        info!(
            workers = self.shared.config.worker_count,
            capacity = self.shared.config.max_queue_size,
            batch_size = self.shared.config.batch_size,
            "Write queue started"
        );
        Ok(())
    }

    /// Enqueue a copy of `data`.
    ///
    /// Waits at most `enqueue_timeout` for room before failing with
    /// [`SinkError::QueueFull`].
    pub async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        if self.state() != QueueState::Running {
            return Err(SinkError::NotRunning);
        }
        let Some(tx) = self.sender.read().clone() else {
            return Err(SinkError::NotRunning);
        };

        let record = Bytes::copy_from_slice(data);
        let result = match tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(record)) => tx
                .send_timeout(record, self.shared.config.enqueue_timeout)
                .await
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(_) => SinkError::QueueFull,
                    SendTimeoutError::Closed(_) => SinkError::NotRunning,
                }),
            Err(TrySendError::Closed(_)) => Err(SinkError::NotRunning),
        };

        match result {
            Ok(()) => {
                self.shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(data.len())
            }
            Err(e) => {
                if matches!(e, SinkError::QueueFull) {
                    self.shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
                }
                Err(e)
            }
        }
    }

    /// Stop with the configured `shutdown_timeout`.
    pub async fn stop(&self) -> Result<(), SinkError> {
        self.stop_with_timeout(self.shared.config.shutdown_timeout).await
    }

    pub async fn stop_with_deadline(&self, deadline: tokio::time::Instant) -> Result<(), SinkError> {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        self.stop_with_timeout(remaining).await
    }

    /// Close the input channel and wait for workers to drain their batches.
    ///
    /// Only the first call does anything; later calls return `Ok(())`. On
    /// timeout the workers keep draining in the background.
    pub async fn stop_with_timeout(&self, timeout: Duration) -> Result<(), SinkError> {
        if self.stop_requested.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let previous = self.state.swap(QueueState::Stopping as u8, Ordering::AcqRel);
        drop(self.sender.write().take());

        if QueueState::from_u8(previous) == QueueState::Created {
            self.state.store(QueueState::Stopped as u8, Ordering::Release);
            return Ok(());
        }

        let handles = std::mem::take(&mut *self.workers.lock());
        let result = tokio::time::timeout(timeout, futures::future::join_all(handles)).await;
        self.state.store(QueueState::Stopped as u8, Ordering::Release);

        match result {
            Ok(joined) => {
                for join_result in joined {
                    if let Err(e) = join_result {
                        error!(error = %e, "Write queue worker terminated abnormally");
                    }
                }
                let stats = self.stats();
                info!(
                    batches = stats.batches_flushed,
                    records = stats.records_flushed,
                    failed_batches = stats.failed_batches,
                    "Write queue stopped"
                );
                Ok(())
            }
            Err(_) => {
                warn!(?timeout, "Write queue shutdown timed out, workers still draining");
                Err(SinkError::ShutdownTimeout(timeout))
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        let c = &self.shared.counters;
        QueueStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            batches_flushed: c.batches_flushed.load(Ordering::Relaxed),
            records_flushed: c.records_flushed.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            failed_batches: c.failed_batches.load(Ordering::Relaxed),
            records_dropped: c.records_dropped.load(Ordering::Relaxed),
        }
    }
}

impl LogSink for WriteQueue {
    fn write<'a>(&'a self, data: &'a [u8]) -> SinkFuture<'a, usize> {
        Box::pin(WriteQueue::write(self, data))
    }

    fn close(&self) -> SinkFuture<'_, ()> {
        Box::pin(async move {
            let stopped = self.stop().await;
            self.shared.sink.close().await?;
            stopped
        })
    }
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish()
    }
}
