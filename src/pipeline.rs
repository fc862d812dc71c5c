//! Explicit assembly of the delivery chain.
//!
//! ```text
//! write() -> AsyncWriter -> RecoveryWrapper -> WriteQueue -> FileSink -> FileTarget -> disk
//!                                         Compactor / RetentionCleaner -> rotated files
//! ```

use crate::config::{ConfigError, PipelineConfig};
use crate::maintenance::{
    CleanupConfig, Compactor, CompressConfig, MaintenanceError, RetentionCleaner,
};
use crate::queue::WriteQueue;
use crate::reliability::{PanicHandler, PipelineMetrics, RecoveryWrapper};
use crate::sink::{ErrorHandler, LogSink, SharedSink, SinkError};
use crate::target::FileTarget;
use crate::writer::AsyncWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
    #[error("Maintenance error: {0}")]
    Maintenance(#[from] MaintenanceError),
}

/// Callbacks attached while assembling the chain.
#[derive(Default, Clone)]
pub struct PipelineHooks {
    /// Failed batch deliveries inside the write queue.
    pub queue_errors: Option<ErrorHandler>,
    /// Failed background retries inside the recovery wrapper.
    pub recovery_errors: Option<ErrorHandler>,
    pub panics: Option<PanicHandler>,
}

pub struct Pipeline {
    output: PathBuf,
    writer: Arc<AsyncWriter>,
    recovery: Arc<RecoveryWrapper>,
    queue: Arc<WriteQueue>,
    target: Arc<FileTarget>,
    compactor: Option<Compactor>,
    cleaner: Option<RetentionCleaner>,
    shut_down: AtomicBool,
}

impl Pipeline {
    pub fn start(config: PipelineConfig, output: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        Self::start_with_hooks(config, output, PipelineHooks::default())
    }

    /// Build the chain from the leaf up and start every background task.
    /// Must be called inside a tokio runtime.
    pub fn start_with_hooks(
        config: PipelineConfig,
        output: impl Into<PathBuf>,
        hooks: PipelineHooks,
    ) -> Result<Self, PipelineError> {
        let output = output.into();
        config.validate()?;

        let target = FileTarget::start(config.target.clone())?;
        let file_sink: SharedSink = Arc::new(target.sink(output.clone()));

        let queue = Arc::new(WriteQueue::with_error_handler(
            file_sink,
            config.queue.clone(),
            hooks.queue_errors,
        )?);
        queue.start()?;

        let mut recovery = RecoveryWrapper::new(queue.clone(), config.recovery.clone())?;
        if let Some(handler) = hooks.panics {
            recovery = recovery.with_panic_handler(handler);
        }
        if let Some(handler) = hooks.recovery_errors {
            recovery = recovery.with_error_handler(handler);
        }
        let recovery = Arc::new(recovery);

        let writer = Arc::new(AsyncWriter::new(recovery.clone(), config.async_writer.clone())?);

        let compactor = if config.compress.enabled {
            let compactor = Compactor::new(compress_defaults(config.compress.clone(), &output))?;
            compactor.start();
            Some(compactor)
        } else {
            None
        };

        let cleaner = if config.cleanup.enabled {
            let cleaner = RetentionCleaner::new(cleanup_defaults(config.cleanup.clone(), &output))?;
            cleaner.start();
            Some(cleaner)
        } else {
            None
        };

        info!(
            output = %output.display(),
            workers = config.queue.worker_count,
            async_writer = config.async_writer.enabled,
            recovery = config.recovery.enabled,
            compaction = config.compress.enabled,
            cleanup = config.cleanup.enabled,
            "Log pipeline started"
        );

        Ok(Self {
            output,
            writer,
            recovery,
            queue,
            target,
            compactor,
            cleaner,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// The outermost layer, for callers that want a plain [`LogSink`].
    pub fn sink(&self) -> SharedSink {
        self.writer.clone()
    }

    pub async fn write(&self, data: &[u8]) -> Result<usize, SinkError> {
        self.writer.write(data).await
    }

    /// Push everything buffered in the async writer into the queue.
    pub async fn flush(&self) -> Result<(), SinkError> {
        self.writer.flush().await
    }

    pub async fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            writer: self.writer.stats(),
            recovery: self.recovery.stats(),
            queue: self.queue.stats(),
            target: self.target.stats().await,
            compactor: self.compactor.as_ref().map(Compactor::stats).unwrap_or_default(),
            cleaner: self.cleaner.as_ref().map(RetentionCleaner::stats).unwrap_or_default(),
        }
    }

    /// Tear the chain down front to back, then stop maintenance.
    ///
    /// Every step runs even if an earlier one fails; the first error is
    /// returned. Later calls are no-ops.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Shutting down log pipeline");

        let mut first_error: Option<PipelineError> = None;

        // Closes recovery, queue and the file sink in turn.
        if let Err(e) = self.writer.stop().await {
            error!(error = %e, "Failed to stop delivery chain");
            first_error.get_or_insert(e.into());
        }
        if let Err(e) = self.target.close().await {
            error!(error = %e, "Failed to close file target");
            first_error.get_or_insert(e.into());
        }
        if let Some(compactor) = &self.compactor
            && let Err(e) = compactor.stop().await
        {
            error!(error = %e, "Failed to stop compactor");
            first_error.get_or_insert(e.into());
        }
        if let Some(cleaner) = &self.cleaner
            && let Err(e) = cleaner.stop().await
        {
            error!(error = %e, "Failed to stop retention cleaner");
            first_error.get_or_insert(e.into());
        }

        let metrics = self.metrics().await;
        info!(
            accepted = metrics.writer.accepted,
            dropped = metrics.writer.dropped,
            batches = metrics.queue.batches_flushed,
            records = metrics.queue.records_flushed,
            failed_batches = metrics.queue.failed_batches,
            bytes = metrics.target.bytes_flushed,
            "Log pipeline stopped"
        );

        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("output", &self.output)
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}

/// Name pattern of files rotated away from `output`.
pub fn rotated_file_pattern(output: &Path, include_compressed: bool) -> String {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = if include_compressed { r"(\.gz|\.zz)?" } else { "" };
    format!(r"^{}\.\d{{8}}-\d{{6}}(-\d+)?{suffix}$", regex::escape(&name))
}

fn output_dir(output: &Path) -> PathBuf {
    match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn compress_defaults(mut config: CompressConfig, output: &Path) -> CompressConfig {
    if config.paths.is_empty() {
        config.paths.push(output_dir(output));
        if config.file_pattern.is_none() {
            config.file_pattern = Some(rotated_file_pattern(output, false));
        }
    }
    config
}

fn cleanup_defaults(mut config: CleanupConfig, output: &Path) -> CleanupConfig {
    if config.directories.is_empty() {
        config.directories.push(output_dir(output));
        if config.file_pattern.is_none() {
            config.file_pattern = Some(rotated_file_pattern(output, true));
        }
    }
    config
}
