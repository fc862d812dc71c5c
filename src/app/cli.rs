use crate::buffer::OnFullPolicy;
use crate::config::{ConfigError, LogFormat, LogLevel, PipelineConfig};
use clap::Parser;
use std::path::PathBuf;

/// Deliver newline-delimited records from stdin to a log file.
#[derive(Parser, Debug, Clone)]
#[command(name = "rask-log-pipeline", author, version, about, long_about = None)]
pub struct Cli {
    /// File that receives the records
    #[arg(long, short, env = "RASK_OUTPUT")]
    pub output: PathBuf,

    /// TOML file with pipeline settings; flags below override it
    #[arg(long, short, env = "RASK_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Records per queue batch
    #[arg(long, env = "BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Queue worker tasks
    #[arg(long, env = "WORKER_COUNT")]
    pub workers: Option<usize>,

    /// Async writer channel capacity
    #[arg(long, env = "BUFFER_SIZE")]
    pub buffer_size: Option<usize>,

    /// What the async writer does when full
    #[arg(long, env = "ON_FULL", value_enum)]
    pub on_full: Option<OnFullPolicy>,

    /// Rotate the output once it reaches this many bytes
    #[arg(long, env = "MAX_FILE_SIZE")]
    pub max_file_size: Option<u64>,
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied.
    pub fn load_config(&self) -> Result<PipelineConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        self.apply_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut PipelineConfig) {
        if let Some(batch_size) = self.batch_size {
            config.queue.batch_size = batch_size;
        }
        if let Some(workers) = self.workers {
            config.queue.worker_count = workers;
        }
        if let Some(buffer_size) = self.buffer_size {
            config.async_writer.buffer_size = buffer_size;
        }
        if let Some(on_full) = self.on_full {
            config.async_writer.on_full = on_full;
        }
        if let Some(max_file_size) = self.max_file_size {
            config.target.max_file_size = Some(max_file_size);
        }
    }
}
