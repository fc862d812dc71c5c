//! Background file-system maintenance: compaction of rotated files and
//! retention cleanup. Both run beside the write path and never touch it.

pub mod cleaner;
pub mod compactor;
pub mod config;

pub use cleaner::{CleanerStats, CleanupReport, RetentionCleaner};
pub use compactor::{CompactionReport, Compactor, CompactorStats};
pub use config::{CleanupConfig, CompressConfig, CompressionAlgorithm};

use crate::config::ConfigError;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tokio::fs;

#[derive(Error, Debug)]
pub enum MaintenanceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl MaintenanceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MaintenanceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A regular file found while scanning a managed directory.
#[derive(Debug, Clone)]
pub(crate) struct FileEntry {
    pub path: PathBuf,
    pub len: u64,
    pub modified: SystemTime,
}

/// Regular files directly inside `dir` whose names match `pattern`.
pub(crate) async fn list_files(
    dir: &Path,
    pattern: Option<&Regex>,
) -> Result<Vec<FileEntry>, MaintenanceError> {
    let mut read_dir = fs::read_dir(dir)
        .await
        .map_err(|e| MaintenanceError::io(dir, e))?;
    let mut files = Vec::new();

    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| MaintenanceError::io(dir, e))?
    {
        let path = entry.path();
        if !name_matches(&path, pattern) {
            continue;
        }
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            // Removed between listing and stat
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(MaintenanceError::io(&path, e)),
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata
            .modified()
            .map_err(|e| MaintenanceError::io(&path, e))?;
        files.push(FileEntry {
            path,
            len: metadata.len(),
            modified,
        });
    }

    Ok(files)
}

pub(crate) fn name_matches(path: &Path, pattern: Option<&Regex>) -> bool {
    let Some(pattern) = pattern else {
        return true;
    };
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| pattern.is_match(name))
}
