use flate2::read::GzDecoder;
use rask_log_pipeline::maintenance::{CleanupConfig, CompressConfig, Compactor, RetentionCleaner};
use rask_log_pipeline::pipeline::rotated_file_pattern;
use rask_log_pipeline::target::{FileTarget, FileTargetConfig};
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn write_aged(dir: &Path, name: &str, age: Duration) {
    let path = dir.join(name);
    fs::write(&path, name.as_bytes()).unwrap();
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(SystemTime::now() - age)
        .unwrap();
}

#[tokio::test]
async fn test_retention_keeps_only_newest_young_file() {
    let dir = TempDir::new().unwrap();
    write_aged(dir.path(), "app.log.today", Duration::ZERO);
    write_aged(dir.path(), "app.log.yesterday", DAY);
    write_aged(dir.path(), "app.log.old", 10 * DAY);

    let cleaner = RetentionCleaner::new(CleanupConfig {
        enabled: true,
        directories: vec![dir.path().to_path_buf()],
        max_backups: 1,
        max_age: Some(7 * DAY),
        ..Default::default()
    })
    .unwrap();

    let report = cleaner.run_once().await.unwrap();

    assert_eq!(report.examined, 3);
    assert_eq!(report.deleted, 2);
    assert_eq!(file_names(dir.path()), vec!["app.log.today"]);
}

#[tokio::test]
async fn test_rotated_segments_are_compressed_then_pruned() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("app.log");

    let target = FileTarget::start(FileTargetConfig {
        buffer_size: 1,
        max_file_size: Some(8),
        ..Default::default()
    })
    .unwrap();
    // Each full segment reaches the size limit and is rotated right away.
    for segment in [b"aaaaaaa\n", b"bbbbbbb\n", b"ccccccc\n"] {
        target.write(&output, segment).await.unwrap();
    }
    target.write(&output, b"dd\n").await.unwrap();
    target.close().await.unwrap();
    assert_eq!(target.stats().await.rotations, 3);
    assert_eq!(fs::read(&output).unwrap(), b"dd\n");

    let compactor = Compactor::new(CompressConfig {
        enabled: true,
        paths: vec![dir.path().to_path_buf()],
        file_pattern: Some(rotated_file_pattern(&output, false)),
        ..Default::default()
    })
    .unwrap();
    let report = compactor.run_once().await.unwrap();
    assert_eq!(report.compressed, 3);
    assert_eq!(report.failed, 0);

    let names = file_names(dir.path());
    assert_eq!(names.len(), 4);
    assert_eq!(names.iter().filter(|n| n.ends_with(".gz")).count(), 3);

    let mut segments = Vec::new();
    for name in names.iter().filter(|n| n.ends_with(".gz")) {
        let mut decoded = String::new();
        GzDecoder::new(File::open(dir.path().join(name)).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        segments.push(decoded);
    }
    segments.sort();
    assert_eq!(segments, vec!["aaaaaaa\n", "bbbbbbb\n", "ccccccc\n"]);

    // The active file never matches the rotated pattern.
    let cleaner = RetentionCleaner::new(CleanupConfig {
        enabled: true,
        directories: vec![dir.path().to_path_buf()],
        file_pattern: Some(rotated_file_pattern(&output, true)),
        max_backups: 1,
        ..Default::default()
    })
    .unwrap();
    let report = cleaner.run_once().await.unwrap();
    assert_eq!(report.deleted, 2);

    let names = file_names(dir.path());
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"app.log".to_string()));
}
