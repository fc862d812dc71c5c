use crate::config::{LogFormat, LogLevel};
use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: ParseError,
    },
    #[error("Tracing subscriber already installed: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Diagnostics for the pipeline process itself, not the records it carries.
#[derive(Debug, Clone)]
pub struct LoggingSystem {
    level: LogLevel,
    format: LogFormat,
    directives: Vec<String>,
}

impl LoggingSystem {
    pub fn new(level: LogLevel, format: LogFormat) -> Self {
        Self {
            level,
            format,
            directives: Vec::new(),
        }
    }

    /// Add a per-target directive such as `rask_log_pipeline::queue=debug`.
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn build_filter_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.directives.len() + 1);
        parts.push(self.level.as_str().to_string());
        parts.extend(self.directives.iter().cloned());
        parts.join(",")
    }

    /// `RUST_LOG` wins when set; otherwise the configured level and directives.
    pub fn build_filter(&self) -> Result<EnvFilter, LoggingError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let filter = self.build_filter_string();
        EnvFilter::try_new(&filter).map_err(|source| LoggingError::InvalidFilter { filter, source })
    }

    /// Install the global subscriber. Fails if one is already installed.
    pub fn init(&self) -> Result<(), LoggingError> {
        let filter = self.build_filter()?;

        let layer = match self.format {
            LogFormat::Compact => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .compact()
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_current_span(false)
                .with_target(true)
                .boxed(),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()?;
        Ok(())
    }
}
