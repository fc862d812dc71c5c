//! Managed set of append-only log files.
//!
//! Every distinct path gets exactly one lazily opened [`FileHandle`]. Writes
//! land in the handle's buffer and reach disk when the buffer fills or on the
//! periodic flush. Idle handles are evicted by a second loop, and the least
//! recently used handle is evicted whenever the open-file budget is reached.

pub mod config;
mod handle;

pub use config::FileTargetConfig;

use crate::config::ConfigError;
use crate::sink::{LogSink, SinkError, SinkFuture};
use handle::{AppendOutcome, FileHandle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// A write that races an eviction reopens the file; bound how often.
const MAX_REOPEN_ATTEMPTS: usize = 3;

#[derive(Debug, Default)]
struct TargetCounters {
    opened: AtomicU64,
    evicted: AtomicU64,
    rotations: AtomicU64,
    rotation_errors: AtomicU64,
    bytes_flushed: AtomicU64,
    flush_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTargetStats {
    pub open_files: usize,
    pub opened: u64,
    pub evicted: u64,
    pub rotations: u64,
    pub rotation_errors: u64,
    pub bytes_flushed: u64,
    pub flush_errors: u64,
}

pub struct FileTarget {
    config: FileTargetConfig,
    handles: Mutex<HashMap<PathBuf, Arc<FileHandle>>>,
    counters: TargetCounters,
    closed: AtomicBool,
    shutdown_token: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl FileTarget {
    /// Validate `config` and spawn the flush and eviction loops.
    pub fn start(config: FileTargetConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        let target = Arc::new(Self {
            config,
            handles: Mutex::new(HashMap::new()),
            counters: TargetCounters::default(),
            closed: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Vec::new()),
        });

        let flush = tokio::spawn(flush_loop(
            Arc::downgrade(&target),
            target.shutdown_token.clone(),
            target.config.flush_interval,
        ));
        let eviction = tokio::spawn(eviction_loop(
            Arc::downgrade(&target),
            target.shutdown_token.clone(),
            target.config.eviction_interval,
        ));
        target.tasks.lock().extend([flush, eviction]);

        info!(
            max_open_files = target.config.max_open_files,
            buffer_size = target.config.buffer_size,
            "File target started"
        );
        Ok(target)
    }

    pub fn config(&self) -> &FileTargetConfig {
        &self.config
    }

    /// A [`LogSink`] bound to one path of this target.
    pub fn sink(self: &Arc<Self>, path: impl Into<PathBuf>) -> FileSink {
        FileSink {
            target: self.clone(),
            path: path.into(),
        }
    }

    pub async fn write(&self, path: impl AsRef<Path>, data: &[u8]) -> Result<usize, SinkError> {
        let path = path.as_ref();

        for _ in 0..MAX_REOPEN_ATTEMPTS {
            if self.is_closed() {
                return Err(SinkError::Closed);
            }

            let handle = self.resolve(path).await?;
            match handle
                .append(data, self.config.buffer_size, self.config.max_file_size)
                .await
            {
                Ok(outcome) => {
                    self.record_outcome(&handle, outcome);
                    return Ok(data.len());
                }
                // Evicted between lookup and append, or left without a file
                Err(SinkError::Closed) => self.forget(path, &handle).await,
                Err(e) => return Err(e),
            }
        }

        Err(SinkError::Closed)
    }

    /// Write out and sync every handle's buffer. Returns the first failure.
    pub async fn flush_all(&self) -> Result<(), SinkError> {
        let handles: Vec<Arc<FileHandle>> = self.handles.lock().await.values().cloned().collect();

        let mut first_error = None;
        for handle in handles {
            if let Err(e) = self.flush_handle(&handle).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub async fn flush_file(&self, path: impl AsRef<Path>) -> Result<(), SinkError> {
        let handle = self.handles.lock().await.get(path.as_ref()).cloned();
        match handle {
            Some(handle) => self.flush_handle(&handle).await,
            None => Ok(()),
        }
    }

    /// Flush, close and forget one path. Unknown paths are ignored.
    pub async fn close_file(&self, path: impl AsRef<Path>) -> Result<(), SinkError> {
        let handle = self.handles.lock().await.remove(path.as_ref());
        match handle {
            Some(handle) => handle.close().await,
            None => Ok(()),
        }
    }

    /// Close every handle whose last use is older than `idle_timeout`.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let idle: Vec<Arc<FileHandle>> = {
            let mut handles = self.handles.lock().await;
            let expired: Vec<PathBuf> = handles
                .iter()
                .filter(|(_, h)| h.idle_for(now) >= self.config.idle_timeout)
                .map(|(p, _)| p.clone())
                .collect();
            expired.iter().filter_map(|p| handles.remove(p)).collect()
        };

        for handle in &idle {
            self.close_evicted(handle, "idle").await;
        }
        idle.len()
    }

    /// Flush and close everything, stop the background loops. Idempotent.
    pub async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown_token.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "File target loop terminated abnormally");
            }
        }

        let handles: Vec<Arc<FileHandle>> = self.handles.lock().await.drain().map(|(_, h)| h).collect();
        let mut first_error = None;
        for handle in handles {
            if let Err(e) = handle.close().await {
                error!(path = %handle.path().display(), error = %e, "Failed to close log file");
                first_error.get_or_insert(e);
            }
        }

        info!(stats = ?self.stats_counters(), "File target closed");
        first_error.map_or(Ok(()), Err)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn stats(&self) -> FileTargetStats {
        FileTargetStats {
            open_files: self.handles.lock().await.len(),
            ..self.stats_counters()
        }
    }

    fn stats_counters(&self) -> FileTargetStats {
        let c = &self.counters;
        FileTargetStats {
            open_files: 0,
            opened: c.opened.load(Ordering::Relaxed),
            evicted: c.evicted.load(Ordering::Relaxed),
            rotations: c.rotations.load(Ordering::Relaxed),
            rotation_errors: c.rotation_errors.load(Ordering::Relaxed),
            bytes_flushed: c.bytes_flushed.load(Ordering::Relaxed),
            flush_errors: c.flush_errors.load(Ordering::Relaxed),
        }
    }

    /// Look up or open the handle for `path`.
    ///
    /// The table lock only covers lookup, insert and removal. Opening the
    /// file and closing an LRU victim happen outside it.
    async fn resolve(&self, path: &Path) -> Result<Arc<FileHandle>, SinkError> {
        {
            let handles = self.handles.lock().await;
            if self.is_closed() {
                return Err(SinkError::Closed);
            }
            if let Some(handle) = handles.get(path) {
                handle.touch();
                return Ok(handle.clone());
            }
        }

        let opened = Arc::new(FileHandle::open(path, self.config.buffer_size).await?);

        let (handle, victim) = {
            let mut handles = self.handles.lock().await;
            if self.is_closed() {
                return Err(SinkError::Closed);
            }
            if let Some(existing) = handles.get(path) {
                // Another writer opened it first; `opened` is empty and dropped.
                existing.touch();
                (existing.clone(), None)
            } else {
                let victim = if handles.len() >= self.config.max_open_files {
                    handles
                        .values()
                        .min_by_key(|h| h.last_used())
                        .map(|h| h.path().to_path_buf())
                        .and_then(|p| handles.remove(&p))
                } else {
                    None
                };
                handles.insert(path.to_path_buf(), opened.clone());
                self.counters.opened.fetch_add(1, Ordering::Relaxed);
                debug!(path = %path.display(), open = handles.len(), "Opened log file");
                (opened, victim)
            }
        };

        if let Some(victim) = victim {
            self.close_evicted(&victim, "lru").await;
        }
        Ok(handle)
    }

    /// Drop `handle` from the table if it is still the entry for `path`.
    async fn forget(&self, path: &Path, handle: &Arc<FileHandle>) {
        let mut handles = self.handles.lock().await;
        if handles.get(path).is_some_and(|h| Arc::ptr_eq(h, handle)) {
            handles.remove(path);
        }
    }

    async fn flush_handle(&self, handle: &FileHandle) -> Result<(), SinkError> {
        match handle.flush(self.config.max_file_size).await {
            Ok(outcome) => {
                self.record_outcome(handle, outcome);
                Ok(())
            }
            Err(e) => {
                self.counters.flush_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn close_evicted(&self, handle: &FileHandle, reason: &'static str) {
        self.counters.evicted.fetch_add(1, Ordering::Relaxed);
        match handle.close().await {
            Ok(()) => debug!(path = %handle.path().display(), reason, "Evicted log file handle"),
            Err(e) => {
                self.counters.flush_errors.fetch_add(1, Ordering::Relaxed);
                warn!(path = %handle.path().display(), reason, error = %e, "Failed to flush evicted handle");
            }
        }
    }

    fn record_outcome(&self, handle: &FileHandle, outcome: AppendOutcome) {
        if outcome.flushed > 0 {
            self.counters
                .bytes_flushed
                .fetch_add(outcome.flushed as u64, Ordering::Relaxed);
        }
        if let Some(e) = outcome.rotation_error {
            self.counters.rotation_errors.fetch_add(1, Ordering::Relaxed);
            warn!(path = %handle.path().display(), error = %e, "Log file rotation failed");
        }
        if let Some(rotated) = outcome.rotated_to {
            self.counters.rotations.fetch_add(1, Ordering::Relaxed);
            info!(
                path = %handle.path().display(),
                rotated = %rotated.display(),
                "Rotated log file"
            );
        }
    }
}

impl std::fmt::Debug for FileTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTarget")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn flush_loop(target: Weak<FileTarget>, shutdown_token: CancellationToken, period: Duration) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            _ = interval.tick() => {
                let Some(target) = target.upgrade() else { break };
                if let Err(e) = target.flush_all().await {
                    warn!(error = %e, "Periodic log file flush failed");
                }
            }
        }
    }
    debug!("File target flush loop stopped");
}

async fn eviction_loop(target: Weak<FileTarget>, shutdown_token: CancellationToken, period: Duration) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            _ = interval.tick() => {
                let Some(target) = target.upgrade() else { break };
                let evicted = target.evict_idle().await;
                if evicted > 0 {
                    info!(evicted, "Evicted idle log file handles");
                }
            }
        }
    }
    debug!("File target eviction loop stopped");
}

/// One path of a [`FileTarget`], usable wherever a [`LogSink`] is expected.
#[derive(Debug, Clone)]
pub struct FileSink {
    target: Arc<FileTarget>,
    path: PathBuf,
}

impl FileSink {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn target(&self) -> &Arc<FileTarget> {
        &self.target
    }
}

impl LogSink for FileSink {
    fn write<'a>(&'a self, data: &'a [u8]) -> SinkFuture<'a, usize> {
        Box::pin(self.target.write(&self.path, data))
    }

    fn flush(&self) -> SinkFuture<'_, ()> {
        Box::pin(self.target.flush_file(&self.path))
    }

    fn close(&self) -> SinkFuture<'_, ()> {
        Box::pin(self.target.close_file(&self.path))
    }
}
