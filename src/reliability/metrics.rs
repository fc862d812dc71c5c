use crate::maintenance::{CleanerStats, CompactorStats};
use crate::queue::QueueStats;
use crate::reliability::RecoveryStats;
use crate::target::FileTargetStats;
use crate::writer::AsyncWriterStats;
#[cfg(feature = "metrics")]
use prometheus::{Encoder, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[cfg(feature = "metrics")]
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
    #[error("Metrics encoding error: {0}")]
    EncodingError(String),
}

/// Point-in-time view of every component's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineMetrics {
    pub writer: AsyncWriterStats,
    pub recovery: RecoveryStats,
    pub queue: QueueStats,
    pub target: FileTargetStats,
    pub compactor: CompactorStats,
    pub cleaner: CleanerStats,
}

impl PipelineMetrics {
    /// Records that will never reach disk: dropped at the front door or
    /// discarded after the queue exhausted its retries.
    pub fn records_lost(&self) -> u64 {
        self.writer.dropped + self.queue.records_dropped
    }
}

#[cfg(feature = "metrics")]
type Accessor = fn(&PipelineMetrics) -> u64;

#[cfg(feature = "metrics")]
const GAUGES: &[(&str, &str, Accessor)] = &[
    ("rask_pipeline_writer_accepted", "Records accepted by the async writer", |m| m.writer.accepted),
    ("rask_pipeline_writer_dropped", "Records dropped because the async writer was full", |m| m.writer.dropped),
    ("rask_pipeline_writer_errors", "Failed async writer flushes", |m| m.writer.write_errors),
    ("rask_pipeline_recovery_panics", "Sink panics caught by the recovery wrapper", |m| m.recovery.panics),
    ("rask_pipeline_recovery_recovered", "Writes delivered by a background retry", |m| m.recovery.recovered),
    ("rask_pipeline_recovery_exhausted", "Writes abandoned after all retries", |m| m.recovery.exhausted),
    ("rask_pipeline_queue_enqueued", "Records enqueued on the write queue", |m| m.queue.enqueued),
    ("rask_pipeline_queue_rejected", "Records rejected because the queue was full", |m| m.queue.rejected),
    ("rask_pipeline_queue_batches_flushed", "Batches delivered by queue workers", |m| m.queue.batches_flushed),
    ("rask_pipeline_queue_retries", "Batch delivery retries", |m| m.queue.retries),
    ("rask_pipeline_queue_failed_batches", "Batches dropped after exhausting retries", |m| m.queue.failed_batches),
    ("rask_pipeline_target_open_files", "Currently open log file handles", |m| m.target.open_files as u64),
    ("rask_pipeline_target_bytes_flushed", "Bytes written to log files", |m| m.target.bytes_flushed),
    ("rask_pipeline_target_rotations", "Size-based log file rotations", |m| m.target.rotations),
    ("rask_pipeline_target_rotation_errors", "Log file rotations that failed", |m| m.target.rotation_errors),
    ("rask_pipeline_compactor_files", "Files compressed by the compactor", |m| m.compactor.files_compressed),
    ("rask_pipeline_cleaner_files_deleted", "Files removed by retention cleanup", |m| m.cleaner.files_deleted),
];

/// Publishes [`PipelineMetrics`] snapshots in the Prometheus text format.
#[cfg(feature = "metrics")]
pub struct PrometheusExporter {
    registry: Registry,
    gauges: Vec<(IntGauge, Accessor)>,
}

#[cfg(feature = "metrics")]
impl PrometheusExporter {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let mut gauges = Vec::with_capacity(GAUGES.len());

        for (name, help, accessor) in GAUGES {
            let gauge = IntGauge::with_opts(Opts::new(*name, *help))?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.push((gauge, *accessor));
        }

        Ok(Self { registry, gauges })
    }

    pub fn update(&self, metrics: &PipelineMetrics) {
        for (gauge, accessor) in &self.gauges {
            gauge.set(i64::try_from(accessor(metrics)).unwrap_or(i64::MAX));
        }
    }

    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}
