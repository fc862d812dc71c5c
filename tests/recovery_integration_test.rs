use rask_log_pipeline::queue::{QueueConfig, WriteQueue};
use rask_log_pipeline::reliability::{PanicReport, RecoveryConfig, RecoveryWrapper};
use rask_log_pipeline::sink::{LogSink, MemorySink, SinkError, SinkFuture};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Rejects the first `failures` writes, then records into `memory`.
struct FlakySink {
    calls: AtomicU32,
    failures: u32,
    memory: MemorySink,
}

impl FlakySink {
    fn new(failures: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            failures,
            memory: MemorySink::new(),
        }
    }
}

impl LogSink for FlakySink {
    fn write<'a>(&'a self, data: &'a [u8]) -> SinkFuture<'a, usize> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(SinkError::Failed(format!("call {call} rejected")));
            }
            self.memory.write(data).await
        })
    }
}

struct PanickingSink;

fn explode() -> Result<usize, SinkError> {
    panic!("sink exploded")
}

impl LogSink for PanickingSink {
    fn write<'a>(&'a self, _data: &'a [u8]) -> SinkFuture<'a, usize> {
        Box::pin(async move { explode() })
    }
}

fn fast_recovery(max_retries: u32) -> RecoveryConfig {
    RecoveryConfig {
        max_retries,
        retry_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_flaky_sink_delivers_on_third_attempt() {
    let sink = Arc::new(FlakySink::new(2));
    let wrapper = RecoveryWrapper::new(sink.clone(), fast_recovery(3)).unwrap();

    assert_eq!(wrapper.write(b"payload").await.unwrap(), 7);
    wrapper.wait_for_retries().await;

    assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    assert_eq!(sink.memory.writes(), vec![b"payload".to_vec()]);
    let stats = wrapper.stats();
    assert_eq!(stats.retries_scheduled, 1);
    assert_eq!(stats.retry_attempts, 2);
    assert_eq!(stats.recovered, 1);
    assert_eq!(stats.exhausted, 0);
}

#[tokio::test]
async fn test_panics_surface_without_retry() {
    let reports = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
    let wrapper = RecoveryWrapper::new(Arc::new(PanickingSink), fast_recovery(3))
        .unwrap()
        .with_panic_handler({
            let reports = reports.clone();
            Arc::new(move |report: &PanicReport| reports.lock().push(report.message.clone()))
        });

    let result = wrapper.write(b"boom").await;

    assert!(matches!(result, Err(SinkError::Panicked(ref msg)) if msg.contains("sink exploded")));
    assert_eq!(wrapper.pending_retries(), 0);
    assert_eq!(*reports.lock(), vec!["sink exploded".to_string()]);
    assert_eq!(wrapper.stats().panics, 1);
}

#[tokio::test]
async fn test_close_waits_for_retries_before_closing_queue() {
    let sink = Arc::new(FlakySink::new(1));
    let queue = Arc::new(
        WriteQueue::new(
            sink.clone(),
            QueueConfig {
                retry_count: 1,
                retry_interval: Duration::from_millis(5),
                ..Default::default()
            },
        )
        .unwrap(),
    );
    queue.start().unwrap();

    // The queue itself absorbs the single failure; recovery never sees it.
    let wrapper = RecoveryWrapper::new(queue.clone(), fast_recovery(2)).unwrap();
    wrapper.write(b"line\n").await.unwrap();
    wrapper.close().await.unwrap();

    assert_eq!(sink.memory.contents(), b"line\n");
    assert_eq!(queue.stats().retries, 1);
    assert_eq!(wrapper.stats().retries_scheduled, 0);
}
