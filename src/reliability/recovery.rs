use super::RetryPolicy;
use crate::config::ConfigError;
use crate::config::validation::require_positive_duration;
use crate::sink::{DeliveryFailure, ErrorHandler, LogSink, SharedSink, SinkError, SinkFuture};
use bytes::Bytes;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// When false the wrapper forwards writes untouched.
    pub enabled: bool,
    /// Background attempts after the failed foreground write.
    pub max_retries: u32,
    #[serde(with = "crate::config::serde_helpers")]
    pub retry_interval: Duration,
    /// Attach a backtrace to every panic report.
    pub capture_stack: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            retry_interval: Duration::from_secs(1),
            capture_stack: false,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled {
            require_positive_duration("recovery.retry_interval", self.retry_interval)?;
        }
        Ok(())
    }
}

/// What the panic handler learns about a sink panic.
#[derive(Debug, Clone)]
pub struct PanicReport {
    pub message: String,
    /// Captured at the point the panic was caught.
    pub backtrace: Option<String>,
}

pub type PanicHandler = Arc<dyn Fn(&PanicReport) + Send + Sync>;

#[derive(Debug, Default)]
struct RecoveryCounters {
    panics: AtomicU64,
    retries_scheduled: AtomicU64,
    retry_attempts: AtomicU64,
    recovered: AtomicU64,
    exhausted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub panics: u64,
    pub retries_scheduled: u64,
    pub retry_attempts: u64,
    pub recovered: u64,
    pub exhausted: u64,
}

enum Failure {
    Error(SinkError),
    Panicked(PanicReport),
}

/// Hooks and counters shared with background retry tasks.
struct Observers {
    panic_handler: Option<PanicHandler>,
    error_handler: Option<ErrorHandler>,
    counters: RecoveryCounters,
    capture_stack: bool,
}

impl Observers {
    fn panicked(&self, report: &PanicReport) {
        self.counters.panics.fetch_add(1, Ordering::Relaxed);
        error!(message = %report.message, "Sink panicked during write");
        if let Some(handler) = &self.panic_handler {
            handler(report);
        }
    }

    fn failed(&self, error: &SinkError, attempt: u32, bytes: usize, exhausted: bool) {
        if let Some(handler) = &self.error_handler {
            handler(&DeliveryFailure {
                error,
                attempt,
                bytes,
                exhausted,
            });
        }
    }
}

/// Decorator that keeps a misbehaving sink from reaching the producer.
///
/// Panics are caught and returned as [`SinkError::Panicked`] without retry.
/// Transient errors are reported as success and retried in the background at
/// a fixed interval; [`RecoveryWrapper::wait_for_retries`] joins those tasks.
/// Permanent errors (see [`SinkError::is_transient`]) are returned as is.
pub struct RecoveryWrapper {
    inner: SharedSink,
    config: RecoveryConfig,
    retry: RetryPolicy,
    observers: Arc<Observers>,
    tracker: TaskTracker,
    closed: AtomicBool,
}

impl RecoveryWrapper {
    pub fn new(inner: SharedSink, config: RecoveryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let retry = RetryPolicy::fixed(config.max_retries, config.retry_interval);
        let observers = Arc::new(Observers {
            panic_handler: None,
            error_handler: None,
            counters: RecoveryCounters::default(),
            capture_stack: config.capture_stack,
        });

        Ok(Self {
            inner,
            config,
            retry,
            observers,
            tracker: TaskTracker::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn with_panic_handler(mut self, handler: PanicHandler) -> Self {
        self.observers = self.rebuild_observers(Some(handler), self.observers.error_handler.clone());
        self
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.observers = self.rebuild_observers(self.observers.panic_handler.clone(), Some(handler));
        self
    }

    fn rebuild_observers(
        &self,
        panic_handler: Option<PanicHandler>,
        error_handler: Option<ErrorHandler>,
    ) -> Arc<Observers> {
        Arc::new(Observers {
            panic_handler,
            error_handler,
            counters: RecoveryCounters::default(),
            capture_stack: self.config.capture_stack,
        })
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        if !self.config.enabled {
            return self.inner.write(data).await;
        }

        match guarded_write(&self.inner, data, self.observers.capture_stack).await {
            Ok(written) => Ok(written),
            Err(Failure::Panicked(report)) => {
                self.observers.panicked(&report);
                Err(SinkError::Panicked(report.message))
            }
            Err(Failure::Error(error)) if !error.is_transient() => {
                // Permanent errors go straight back to the caller.
                self.observers.failed(&error, 1, data.len(), true);
                self.observers.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                Err(error)
            }
            Err(Failure::Error(error)) => {
                let exhausted = self.retry.max_retries == 0;
                self.observers.failed(&error, 1, data.len(), exhausted);
                if exhausted {
                    self.observers.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                    warn!(bytes = data.len(), error = %error, "Write failed and retries are disabled");
                } else {
                    debug!(bytes = data.len(), error = %error, "Write failed, retrying in background");
                    self.schedule_retry(Bytes::copy_from_slice(data));
                }
                Ok(data.len())
            }
        }
    }

    fn schedule_retry(&self, payload: Bytes) {
        self.observers
            .counters
            .retries_scheduled
            .fetch_add(1, Ordering::Relaxed);

        let inner = self.inner.clone();
        let observers = self.observers.clone();
        let retry = self.retry.clone();

        self.tracker.spawn(async move {
            let max_attempts = retry.max_attempts();
            // Attempt 1 was the foreground write.
            for attempt in 2..=max_attempts {
                tokio::time::sleep(retry.delay_for(attempt - 1)).await;
                observers.counters.retry_attempts.fetch_add(1, Ordering::Relaxed);

                match guarded_write(&inner, &payload, observers.capture_stack).await {
                    Ok(_) => {
                        observers.counters.recovered.fetch_add(1, Ordering::Relaxed);
                        debug!(attempt, bytes = payload.len(), "Retried write succeeded");
                        return;
                    }
                    Err(Failure::Panicked(report)) => {
                        observers.panicked(&report);
                        observers.counters.exhausted.fetch_add(1, Ordering::Relaxed);
                        return;
                    }
                    Err(Failure::Error(error)) => {
                        let exhausted = attempt >= max_attempts || !error.is_transient();
                        observers.failed(&error, attempt, payload.len(), exhausted);
                        if exhausted {
                            warn!(
                                attempts = attempt,
                                bytes = payload.len(),
                                error = %error,
                                "Giving up on write"
                            );
                            break;
                        }
                    }
                }
            }
            observers.counters.exhausted.fetch_add(1, Ordering::Relaxed);
        });
    }

    /// Wait until every in-flight background retry has finished.
    pub async fn wait_for_retries(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    pub fn pending_retries(&self) -> usize {
        self.tracker.len()
    }

    /// Drain outstanding retries, then close the wrapped sink. Idempotent.
    pub async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.wait_for_retries().await;
        self.inner.close().await
    }

    pub fn stats(&self) -> RecoveryStats {
        let c = &self.observers.counters;
        RecoveryStats {
            panics: c.panics.load(Ordering::Relaxed),
            retries_scheduled: c.retries_scheduled.load(Ordering::Relaxed),
            retry_attempts: c.retry_attempts.load(Ordering::Relaxed),
            recovered: c.recovered.load(Ordering::Relaxed),
            exhausted: c.exhausted.load(Ordering::Relaxed),
        }
    }
}

impl LogSink for RecoveryWrapper {
    fn write<'a>(&'a self, data: &'a [u8]) -> SinkFuture<'a, usize> {
        Box::pin(RecoveryWrapper::write(self, data))
    }

    fn flush(&self) -> SinkFuture<'_, ()> {
        self.inner.flush()
    }

    fn close(&self) -> SinkFuture<'_, ()> {
        Box::pin(RecoveryWrapper::close(self))
    }
}

impl std::fmt::Debug for RecoveryWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryWrapper")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

async fn guarded_write(inner: &SharedSink, data: &[u8], capture_stack: bool) -> Result<usize, Failure> {
    match AssertUnwindSafe(async { inner.write(data).await })
        .catch_unwind()
        .await
    {
        Ok(Ok(written)) => Ok(written),
        Ok(Err(error)) => Err(Failure::Error(error)),
        Err(payload) => Err(Failure::Panicked(PanicReport {
            message: panic_message(payload.as_ref()),
            backtrace: capture_stack.then(|| Backtrace::force_capture().to_string()),
        })),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
