use crate::sink::SinkError;
use chrono::Local;
use parking_lot::Mutex as SyncMutex;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Buffered state behind a handle's async lock.
struct HandleState {
    /// `None` once the handle has been closed or evicted.
    file: Option<File>,
    buf: Vec<u8>,
    /// Bytes already on disk in the current file.
    on_disk: u64,
}

/// One open file plus its pending bytes.
pub(crate) struct FileHandle {
    path: PathBuf,
    state: Mutex<HandleState>,
    last_used: SyncMutex<Instant>,
}

/// Outcome of an append that had to touch the disk.
///
/// A failed rotation does not fail the write: the bytes are already on disk.
#[derive(Debug, Default)]
pub(crate) struct AppendOutcome {
    pub flushed: usize,
    pub rotated_to: Option<PathBuf>,
    pub rotation_error: Option<SinkError>,
}

impl FileHandle {
    pub(crate) async fn open(path: &Path, buffer_size: usize) -> Result<Self, SinkError> {
        let file = open_append(path).await?;
        let on_disk = file.metadata().await?.len();

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(HandleState {
                file: Some(file),
                buf: Vec::with_capacity(buffer_size),
                on_disk,
            }),
            last_used: SyncMutex::new(Instant::now()),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    pub(crate) fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used())
    }

    /// Buffer `data`; write it through once the buffer passes `buffer_size`.
    ///
    /// Fails with [`SinkError::Closed`] when the handle was closed underneath
    /// the caller, which the target treats as "reopen and try again". When the
    /// flush fails, `data` is taken back out of the buffer so a retried write
    /// lands only once.
    pub(crate) async fn append(
        &self,
        data: &[u8],
        buffer_size: usize,
        max_file_size: Option<u64>,
    ) -> Result<AppendOutcome, SinkError> {
        let mut state = self.state.lock().await;
        if state.file.is_none() {
            return Err(SinkError::Closed);
        }
        self.touch();

        let previous = state.buf.len();
        state.buf.extend_from_slice(data);
        let mut outcome = AppendOutcome::default();
        if state.buf.len() >= buffer_size {
            outcome.flushed = match flush_state(&mut state).await {
                Ok(flushed) => flushed,
                Err(e) => {
                    state.buf.truncate(previous);
                    return Err(e);
                }
            };
            self.rotate_into(&mut state, max_file_size, &mut outcome).await;
        }
        Ok(outcome)
    }

    pub(crate) async fn flush(&self, max_file_size: Option<u64>) -> Result<AppendOutcome, SinkError> {
        let mut state = self.state.lock().await;
        if state.file.is_none() {
            return Ok(AppendOutcome::default());
        }
        let mut outcome = AppendOutcome {
            flushed: flush_state(&mut state).await?,
            ..AppendOutcome::default()
        };
        self.rotate_into(&mut state, max_file_size, &mut outcome).await;
        Ok(outcome)
    }

    /// Flush and release the descriptor. Closing twice is a no-op.
    pub(crate) async fn close(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock().await;
        if state.file.is_none() {
            return Ok(());
        }
        let flushed = flush_state(&mut state).await;
        state.file = None;
        flushed.map(|_| ())
    }

    async fn rotate_into(&self, state: &mut HandleState, max_file_size: Option<u64>, outcome: &mut AppendOutcome) {
        match self.rotate_if_needed(state, max_file_size).await {
            Ok(rotated) => outcome.rotated_to = rotated,
            Err(e) => outcome.rotation_error = Some(e),
        }
    }

    /// Rename the file away once it reaches `max_file_size` and start a new
    /// one. The path is reopened even when the rename fails, so the handle
    /// stays usable.
    async fn rotate_if_needed(
        &self,
        state: &mut HandleState,
        max_file_size: Option<u64>,
    ) -> Result<Option<PathBuf>, SinkError> {
        let Some(max) = max_file_size else {
            return Ok(None);
        };
        if state.on_disk < max {
            return Ok(None);
        }

        drop(state.file.take());
        let rotated = rotated_path(&self.path).await;
        let renamed = tokio::fs::rename(&self.path, &rotated).await;

        let file = open_append(&self.path).await?;
        state.on_disk = match file.metadata().await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        state.file = Some(file);

        renamed?;
        Ok(Some(rotated))
    }
}

async fn flush_state(state: &mut HandleState) -> Result<usize, SinkError> {
    if state.buf.is_empty() {
        return Ok(0);
    }
    let file = state.file.as_mut().ok_or(SinkError::Closed)?;

    file.write_all(&state.buf).await?;
    file.flush().await?;
    file.sync_data().await?;

    let written = state.buf.len();
    state.on_disk += written as u64;
    state.buf.clear();
    Ok(written)
}

async fn open_append(path: &Path) -> Result<File, SinkError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(file)
}

/// `<name>.<YYYYmmdd-HHMMSS>`, with `-n` appended until the name is free.
pub(crate) async fn rotated_path(path: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let base = path.as_os_str().to_string_lossy().into_owned();

    let mut candidate = PathBuf::from(format!("{base}.{stamp}"));
    let mut n = 1;
    while tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        candidate = PathBuf::from(format!("{base}.{stamp}-{n}"));
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_append_buffers_until_threshold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let handle = FileHandle::open(&path, 8).await.unwrap();

        let outcome = handle.append(b"abc", 8, None).await.unwrap();
        assert_eq!(outcome.flushed, 0);
        assert_eq!(std::fs::read(&path).unwrap(), b"");

        let outcome = handle.append(b"defgh", 8, None).await.unwrap();
        assert_eq!(outcome.flushed, 8);
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdefgh");
    }

    #[tokio::test]
    async fn test_close_flushes_and_rejects_later_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/dir/app.log");
        let handle = FileHandle::open(&path, 1024).await.unwrap();

        handle.append(b"pending", 1024, None).await.unwrap();
        handle.close().await.unwrap();
        handle.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"pending");
        assert!(matches!(
            handle.append(b"x", 1024, None).await,
            Err(SinkError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_rotation_renames_with_timestamp_suffix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let handle = FileHandle::open(&path, 4).await.unwrap();

        let outcome = handle.append(b"0123456789", 4, Some(10)).await.unwrap();
        let rotated = outcome.rotated_to.expect("file should rotate");

        let name = rotated.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("app.log."), "unexpected name {name}");
        assert_eq!(std::fs::read(&rotated).unwrap(), b"0123456789");
        assert_eq!(std::fs::read(&path).unwrap(), b"");

        handle.append(b"next", 4, Some(10)).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"next");
    }

    #[tokio::test]
    async fn test_rotated_path_avoids_collisions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");

        let first = rotated_path(&path).await;
        std::fs::write(&first, b"taken").unwrap();
        let second = rotated_path(&path).await;

        assert_ne!(first, second);
        // A second may tick over between the two calls.
        let second_name = second.file_name().unwrap().to_string_lossy().into_owned();
        assert!(second_name.starts_with("app.log."));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_failed_flush_does_not_keep_the_write() {
        let handle = FileHandle::open(Path::new("/dev/full"), 1).await.unwrap();

        assert!(handle.append(b"abc", 1, None).await.is_err());
        assert!(handle.append(b"abc", 1, None).await.is_err());

        assert!(handle.state.lock().await.buf.is_empty());
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_handle_usable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let handle = FileHandle::open(&path, 1).await.unwrap();

        handle.append(b"ab", 1, Some(4)).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        // Lands in the unlinked file, then the rename finds nothing to move.
        let outcome = handle.append(b"cd", 1, Some(4)).await.unwrap();
        assert_eq!(outcome.flushed, 2);
        assert!(outcome.rotated_to.is_none());
        assert!(outcome.rotation_error.is_some());

        handle.append(b"ef", 1, Some(4)).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"ef");
    }
}
