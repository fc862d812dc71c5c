use rask_log_pipeline::maintenance::{CleanupConfig, CompressConfig, Compactor, RetentionCleaner};
use rask_log_pipeline::queue::{QueueConfig, WriteQueue};
use rask_log_pipeline::reliability::{RecoveryConfig, RecoveryWrapper};
use rask_log_pipeline::target::{FileTarget, FileTargetConfig};
use rask_log_pipeline::writer::{AsyncConfig, AsyncWriter};
use rask_log_pipeline::{LogSink, MemorySink, Pipeline, PipelineConfig, SinkError};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_every_component_stops_twice() {
    let dir = TempDir::new().unwrap();

    let writer = AsyncWriter::new(Arc::new(MemorySink::new()), AsyncConfig::default()).unwrap();
    writer.stop().await.unwrap();
    writer.stop().await.unwrap();

    let queue = WriteQueue::new(Arc::new(MemorySink::new()), QueueConfig::default()).unwrap();
    queue.start().unwrap();
    queue.stop().await.unwrap();
    queue.stop().await.unwrap();

    let recovery = RecoveryWrapper::new(Arc::new(MemorySink::new()), RecoveryConfig::default()).unwrap();
    recovery.close().await.unwrap();
    recovery.close().await.unwrap();

    let target = FileTarget::start(FileTargetConfig::default()).unwrap();
    target.close().await.unwrap();
    target.close().await.unwrap();

    let compactor = Compactor::new(CompressConfig {
        enabled: true,
        paths: vec![dir.path().to_path_buf()],
        ..Default::default()
    })
    .unwrap();
    compactor.start();
    compactor.stop().await.unwrap();
    compactor.stop().await.unwrap();

    let cleaner = RetentionCleaner::new(CleanupConfig {
        enabled: true,
        directories: vec![dir.path().to_path_buf()],
        ..Default::default()
    })
    .unwrap();
    cleaner.start();
    cleaner.stop().await.unwrap();
    cleaner.stop().await.unwrap();

    let pipeline = Pipeline::start(PipelineConfig::default(), dir.path().join("app.log")).unwrap();
    pipeline.shutdown().await.unwrap();
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_layers_compose_through_log_sink() {
    let memory = Arc::new(MemorySink::new());

    let queue = Arc::new(WriteQueue::new(memory.clone(), QueueConfig::default()).unwrap());
    queue.start().unwrap();
    let recovery = Arc::new(RecoveryWrapper::new(queue, RecoveryConfig::default()).unwrap());
    let writer = AsyncWriter::new(recovery, AsyncConfig::default()).unwrap();

    writer.write(b"one\n").await.unwrap();
    writer.write(b"two\n").await.unwrap();
    LogSink::close(&writer).await.unwrap();

    assert_eq!(memory.contents(), b"one\ntwo\n");
    assert!(memory.is_closed());
    assert!(matches!(writer.write(b"three\n").await, Err(SinkError::Closed)));
}
