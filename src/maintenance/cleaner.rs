use super::{CleanupConfig, FileEntry, MaintenanceError, list_files};
use crate::config::ConfigError;
use crate::config::validation::compile_pattern;
use parking_lot::Mutex;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub examined: usize,
    pub deleted: usize,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanerStats {
    pub runs: u64,
    pub files_deleted: u64,
    pub bytes_freed: u64,
}

#[derive(Debug, Default)]
struct CleanerCounters {
    runs: AtomicU64,
    files_deleted: AtomicU64,
    bytes_freed: AtomicU64,
}

struct CleanerInner {
    config: CleanupConfig,
    pattern: Option<Regex>,
    counters: CleanerCounters,
}

/// Why a file was selected for deletion.
#[derive(Debug, Clone, Copy)]
enum Reason {
    Age,
    Backups,
    Quota,
}

/// Deletes log files beyond the configured age, count and size limits.
pub struct RetentionCleaner {
    inner: Arc<CleanerInner>,
    shutdown_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RetentionCleaner {
    pub fn new(config: CleanupConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let pattern = compile_pattern("cleanup.file_pattern", config.file_pattern.as_deref())?;

        Ok(Self {
            inner: Arc::new(CleanerInner {
                config,
                pattern,
                counters: CleanerCounters::default(),
            }),
            shutdown_token: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Run a pass on every interval tick until stopped. The first pass
    /// happens one interval after start.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() || self.shutdown_token.is_cancelled() {
            return;
        }

        let inner = self.inner.clone();
        let token = self.shutdown_token.clone();
        *task = Some(tokio::spawn(async move {
            let period = inner.config.interval;
            info!(
                directories = inner.config.directories.len(),
                ?period,
                "Retention cleaner started"
            );

            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        info!("Retention cleaner received shutdown signal, stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = inner.run_once().await {
                            error!(error = %e, "Retention pass failed");
                        }
                    }
                }
            }
        }));
    }

    pub async fn stop(&self) -> Result<(), MaintenanceError> {
        self.shutdown_token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await?;
        }
        Ok(())
    }

    pub async fn run_once(&self) -> Result<CleanupReport, MaintenanceError> {
        self.inner.run_once().await
    }

    pub fn stats(&self) -> CleanerStats {
        let c = &self.inner.counters;
        CleanerStats {
            runs: c.runs.load(Ordering::Relaxed),
            files_deleted: c.files_deleted.load(Ordering::Relaxed),
            bytes_freed: c.bytes_freed.load(Ordering::Relaxed),
        }
    }
}

impl CleanerInner {
    async fn run_once(&self) -> Result<CleanupReport, MaintenanceError> {
        self.counters.runs.fetch_add(1, Ordering::Relaxed);
        let mut report = CleanupReport::default();

        for dir in &self.config.directories {
            match self.clean_directory(dir, &mut report).await {
                Ok(()) => {}
                Err(MaintenanceError::Io { source, .. })
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    debug!(dir = %dir.display(), "Retention directory does not exist yet");
                }
                Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to clean directory"),
            }
        }

        self.counters
            .files_deleted
            .fetch_add(report.deleted as u64, Ordering::Relaxed);
        self.counters
            .bytes_freed
            .fetch_add(report.bytes_freed, Ordering::Relaxed);
        if report.deleted > 0 {
            info!(
                deleted = report.deleted,
                bytes_freed = report.bytes_freed,
                "Retention pass finished"
            );
        }
        Ok(report)
    }

    async fn clean_directory(&self, dir: &Path, report: &mut CleanupReport) -> Result<(), MaintenanceError> {
        let mut files = list_files(dir, self.pattern.as_ref()).await?;
        report.examined += files.len();

        // Newest first
        files.sort_by(|a, b| b.modified.cmp(&a.modified));

        for (entry, reason) in select_for_deletion(files, &self.config, SystemTime::now()) {
            match fs::remove_file(&entry.path).await {
                Ok(()) => {
                    report.deleted += 1;
                    report.bytes_freed += entry.len;
                    info!(path = %entry.path.display(), bytes = entry.len, ?reason, "Removed log file");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => error!(path = %entry.path.display(), error = %e, "Failed to remove log file"),
            }
        }
        Ok(())
    }
}

/// Apply age, backup-count and quota limits to `files` sorted newest first.
fn select_for_deletion(
    files: Vec<FileEntry>,
    config: &CleanupConfig,
    now: SystemTime,
) -> Vec<(FileEntry, Reason)> {
    let mut doomed = Vec::new();
    let mut kept = Vec::with_capacity(files.len());

    for entry in files {
        let age = now.duration_since(entry.modified).unwrap_or_default();
        match config.max_age {
            Some(max_age) if age > max_age => doomed.push((entry, Reason::Age)),
            _ => kept.push(entry),
        }
    }

    if config.max_backups > 0 && kept.len() > config.max_backups {
        doomed.extend(kept.split_off(config.max_backups).into_iter().map(|e| (e, Reason::Backups)));
    }

    if let Some(quota) = config.max_total_bytes {
        let mut total: u64 = kept.iter().map(|e| e.len).sum();
        // Oldest first, never the newest file
        while total > quota && kept.len() > 1 {
            if let Some(entry) = kept.pop() {
                total = total.saturating_sub(entry.len);
                doomed.push((entry, Reason::Quota));
            }
        }
    }

    doomed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn write_aged(dir: &Path, name: &str, bytes: usize, age: Duration) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, vec![b'x'; bytes]).unwrap();
        let file = File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
        path
    }

    fn config(dir: &Path) -> CleanupConfig {
        CleanupConfig {
            enabled: true,
            interval: Duration::from_secs(60),
            directories: vec![dir.to_path_buf()],
            file_pattern: None,
            max_backups: 0,
            max_age: None,
            max_total_bytes: None,
        }
    }

    #[tokio::test]
    async fn test_age_then_backup_limits() {
        let dir = TempDir::new().unwrap();
        let newest = write_aged(dir.path(), "app.log.3", 10, Duration::ZERO);
        let middle = write_aged(dir.path(), "app.log.2", 10, DAY);
        let oldest = write_aged(dir.path(), "app.log.1", 10, 10 * DAY);

        let cleaner = RetentionCleaner::new(CleanupConfig {
            max_age: Some(7 * DAY),
            max_backups: 1,
            ..config(dir.path())
        })
        .unwrap();
        let report = cleaner.run_once().await.unwrap();

        assert_eq!(report.deleted, 2);
        assert!(newest.exists());
        assert!(!middle.exists());
        assert!(!oldest.exists());
    }

    #[tokio::test]
    async fn test_zero_backups_means_unlimited() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            write_aged(dir.path(), &format!("app.log.{i}"), 1, DAY * i);
        }

        let cleaner = RetentionCleaner::new(config(dir.path())).unwrap();
        let report = cleaner.run_once().await.unwrap();

        assert_eq!(report.examined, 5);
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn test_quota_keeps_newest_file() {
        let dir = TempDir::new().unwrap();
        let newest = write_aged(dir.path(), "b.log", 100, Duration::ZERO);
        let older = write_aged(dir.path(), "a.log", 100, DAY);

        let cleaner = RetentionCleaner::new(CleanupConfig {
            max_total_bytes: Some(10),
            ..config(dir.path())
        })
        .unwrap();
        let report = cleaner.run_once().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.bytes_freed, 100);
        assert!(newest.exists());
        assert!(!older.exists());
    }

    #[tokio::test]
    async fn test_pattern_limits_scope() {
        let dir = TempDir::new().unwrap();
        let unrelated = write_aged(dir.path(), "notes.txt", 1, 30 * DAY);
        let managed = write_aged(dir.path(), "app.log.1", 1, 30 * DAY);

        let cleaner = RetentionCleaner::new(CleanupConfig {
            file_pattern: Some(r"^app\.log".to_string()),
            max_age: Some(DAY),
            ..config(dir.path())
        })
        .unwrap();
        cleaner.run_once().await.unwrap();

        assert!(unrelated.exists());
        assert!(!managed.exists());
        assert_eq!(cleaner.stats().files_deleted, 1);
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_an_error() {
        let cleaner = RetentionCleaner::new(config(Path::new("/nonexistent/rask/logs"))).unwrap();
        let report = cleaner.run_once().await.unwrap();
        assert_eq!(report.examined, 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cleaner = RetentionCleaner::new(config(dir.path())).unwrap();

        cleaner.start();
        cleaner.stop().await.unwrap();
        cleaner.stop().await.unwrap();
        // A stopped cleaner does not restart
        cleaner.start();
        cleaner.stop().await.unwrap();
    }
}
