pub mod cli;
pub mod logging_system;
pub mod shutdown;

pub use cli::Cli;
pub use logging_system::{LoggingError, LoggingSystem};
pub use shutdown::{ShutdownReason, wait_for_signal};

use crate::config::PipelineConfig;
use crate::pipeline::Pipeline;
use crate::sink::SinkError;
use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// The stdin-to-file binary.
pub struct App {
    cli: Cli,
    config: PipelineConfig,
}

impl App {
    pub fn from_args<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args)?;
        Self::from_cli(cli)
    }

    pub fn from_cli(cli: Cli) -> anyhow::Result<Self> {
        let config = cli.load_config().context("failed to load pipeline configuration")?;
        Ok(Self { cli, config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Pump stdin into the pipeline until EOF or a shutdown signal.
    pub async fn run(self) -> anyhow::Result<()> {
        let pipeline = Pipeline::start(self.config, &self.cli.output)
            .with_context(|| format!("failed to start pipeline for {}", self.cli.output.display()))?;

        info!(
            "rask-log-pipeline v{} writing to {}",
            env!("CARGO_PKG_VERSION"),
            self.cli.output.display()
        );

        let stdin = BufReader::new(tokio::io::stdin());
        let reason = tokio::select! {
            result = pump(&pipeline, stdin) => {
                let lines = result.context("failed to read stdin")?;
                info!(lines, "Reached end of input");
                ShutdownReason::EndOfInput
            }
            reason = wait_for_signal() => reason,
        };

        info!(?reason, "Stopping");
        pipeline.shutdown().await.context("pipeline shutdown failed")?;
        Ok(())
    }
}

/// Forward each line of `reader` as one newline-terminated record.
///
/// Lines are passed as raw bytes; no decoding happens here.
pub async fn pump<R>(pipeline: &Pipeline, mut reader: R) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(1024);
    let mut count = 0;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(count);
        }
        if line.last() != Some(&b'\n') {
            line.push(b'\n');
        }

        match pipeline.write(&line).await {
            Ok(_) => count += 1,
            Err(SinkError::Closed) => {
                warn!("Pipeline closed while reading input");
                return Ok(count);
            }
            Err(e) => warn!(error = %e, "Dropping input line"),
        }
    }
}

pub async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    LoggingSystem::new(cli.log_level, cli.log_format)
        .init()
        .context("failed to initialize logging")?;

    App::from_cli(cli)?.run().await
}
