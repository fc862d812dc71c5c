use super::{CompressConfig, CompressionAlgorithm, MaintenanceError, list_files, name_matches};
use crate::config::ConfigError;
use crate::config::validation::compile_pattern;
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use parking_lot::Mutex;
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DELETE_ATTEMPTS: u32 = 3;
const DELETE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub compressed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactorStats {
    pub runs: u64,
    pub files_compressed: u64,
    pub failures: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

#[derive(Debug, Default)]
struct CompactorCounters {
    runs: AtomicU64,
    files_compressed: AtomicU64,
    failures: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

struct CompactorInner {
    config: CompressConfig,
    pattern: Option<Regex>,
    counters: CompactorCounters,
}

/// Compresses finished log files next to themselves (`<file>.gz` / `<file>.zz`).
///
/// Not transactional: a crash between writing the archive and deleting the
/// source leaves both on disk.
pub struct Compactor {
    inner: Arc<CompactorInner>,
    shutdown_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Compactor {
    pub fn new(config: CompressConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pattern = compile_pattern("compress.file_pattern", config.file_pattern.as_deref())?;

        Ok(Self {
            inner: Arc::new(CompactorInner {
                config,
                pattern,
                counters: CompactorCounters::default(),
            }),
            shutdown_token: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Run a pass now and then on every interval tick until stopped.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() || self.shutdown_token.is_cancelled() {
            return;
        }

        let inner = self.inner.clone();
        let token = self.shutdown_token.clone();
        *task = Some(tokio::spawn(async move {
            let period = inner.config.interval;
            info!(paths = inner.config.paths.len(), ?period, "Compactor started");

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = inner.run_once().await {
                            error!(error = %e, "Compaction pass failed");
                        }
                    }
                }
            }
            info!("Compactor stopped");
        }));
    }

    /// Cancel the loop and wait for an in-progress pass. Idempotent.
    pub async fn stop(&self) -> Result<(), MaintenanceError> {
        self.shutdown_token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await?;
        }
        Ok(())
    }

    pub async fn run_once(&self) -> Result<CompactionReport, MaintenanceError> {
        self.inner.run_once().await
    }

    pub fn stats(&self) -> CompactorStats {
        let c = &self.inner.counters;
        CompactorStats {
            runs: c.runs.load(Ordering::Relaxed),
            files_compressed: c.files_compressed.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            bytes_in: c.bytes_in.load(Ordering::Relaxed),
            bytes_out: c.bytes_out.load(Ordering::Relaxed),
        }
    }
}

impl CompactorInner {
    async fn run_once(&self) -> Result<CompactionReport, MaintenanceError> {
        self.counters.runs.fetch_add(1, Ordering::Relaxed);
        let mut report = CompactionReport::default();

        for candidate in self.candidates().await {
            match self.compact_file(&candidate).await {
                Ok(Some((bytes_in, bytes_out))) => {
                    report.compressed += 1;
                    report.bytes_in += bytes_in;
                    report.bytes_out += bytes_out;
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(path = %candidate.display(), error = %e, "Failed to compact log file");
                }
            }
        }

        let c = &self.counters;
        c.files_compressed.fetch_add(report.compressed as u64, Ordering::Relaxed);
        c.failures.fetch_add(report.failed as u64, Ordering::Relaxed);
        c.bytes_in.fetch_add(report.bytes_in, Ordering::Relaxed);
        c.bytes_out.fetch_add(report.bytes_out, Ordering::Relaxed);

        if report.compressed > 0 || report.failed > 0 {
            info!(
                compressed = report.compressed,
                failed = report.failed,
                bytes_in = report.bytes_in,
                bytes_out = report.bytes_out,
                "Compaction pass finished"
            );
        }
        Ok(report)
    }

    /// Managed files plus matching files of managed directories.
    async fn candidates(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for path in &self.config.paths {
            match fs::metadata(path).await {
                Ok(meta) if meta.is_dir() => match list_files(path, self.pattern.as_ref()).await {
                    Ok(files) => out.extend(files.into_iter().map(|f| f.path)),
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to scan directory"),
                },
                Ok(meta) if meta.is_file() => out.push(path.clone()),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Compaction path does not exist yet");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to stat compaction path"),
            }
        }
        out
    }

    /// `Ok(None)` when the file is skipped.
    async fn compact_file(&self, source: &Path) -> Result<Option<(u64, u64)>, MaintenanceError> {
        if is_compactor_output(source) || !name_matches(source, self.pattern.as_ref()) {
            return Ok(None);
        }

        let algorithm = self.config.algorithm;
        let target = compressed_path(source, algorithm);
        if fs::try_exists(&target)
            .await
            .map_err(|e| MaintenanceError::io(&target, e))?
        {
            debug!(path = %source.display(), "Compressed sibling already exists");
            return Ok(None);
        }

        let data = fs::read(source)
            .await
            .map_err(|e| MaintenanceError::io(source, e))?;
        if data.is_empty() {
            return Ok(None);
        }
        let bytes_in = data.len() as u64;

        let level = self.config.level;
        let compressed = tokio::task::spawn_blocking(move || encode(&data, algorithm, level))
            .await?
            .map_err(|e| MaintenanceError::io(source, e))?;
        let bytes_out = compressed.len() as u64;

        let tmp = tmp_path(&target);
        if let Err(e) = fs::write(&tmp, &compressed).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(MaintenanceError::io(&tmp, e));
        }
        if let Err(e) = fs::rename(&tmp, &target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(MaintenanceError::io(&target, e));
        }

        debug!(
            source = %source.display(),
            target = %target.display(),
            bytes_in,
            bytes_out,
            "Compressed log file"
        );

        if self.config.delete_source {
            delete_with_retry(source).await?;
        }
        Ok(Some((bytes_in, bytes_out)))
    }
}

fn encode(data: &[u8], algorithm: CompressionAlgorithm, level: u32) -> std::io::Result<Vec<u8>> {
    let level = Compression::new(level);
    match algorithm {
        CompressionAlgorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            encoder.finish()
        }
        CompressionAlgorithm::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            encoder.finish()
        }
    }
}

async fn delete_with_retry(path: &Path) -> Result<(), MaintenanceError> {
    let mut attempt = 1;
    loop {
        match fs::remove_file(path).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if attempt >= DELETE_ATTEMPTS => return Err(MaintenanceError::io(path, e)),
            Err(e) => {
                debug!(path = %path.display(), attempt, error = %e, "Retrying source delete");
                attempt += 1;
                tokio::time::sleep(DELETE_RETRY_DELAY).await;
            }
        }
    }
}

/// Archives and in-flight temporary files are never compaction sources.
fn is_compactor_output(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("gz" | "zz" | "tmp")
    )
}

pub(crate) fn compressed_path(source: &Path, algorithm: CompressionAlgorithm) -> PathBuf {
    let mut name = source.as_os_str().to_owned();
    name.push(".");
    name.push(algorithm.extension());
    PathBuf::from(name)
}

fn tmp_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
