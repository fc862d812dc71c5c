pub mod metrics;
pub mod recovery;
pub mod retry;

#[cfg(feature = "metrics")]
pub use metrics::PrometheusExporter;
pub use metrics::{MetricsError, PipelineMetrics};
pub use recovery::{PanicHandler, PanicReport, RecoveryConfig, RecoveryStats, RecoveryWrapper};
pub use retry::{RetryPolicy, RetryStrategy};
