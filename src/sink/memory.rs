use super::{LogSink, SinkError, SinkFuture};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// In-process sink that keeps every delivered write in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    writes: Mutex<Vec<Vec<u8>>>,
    flushes: AtomicU64,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write as delivered, one entry per `write` call.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    /// All delivered bytes concatenated in arrival order.
    pub fn contents(&self) -> Vec<u8> {
        self.writes.lock().concat()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().len()
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl LogSink for MemorySink {
    fn write<'a>(&'a self, data: &'a [u8]) -> SinkFuture<'a, usize> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(SinkError::Closed);
            }
            self.writes.lock().push(data.to_vec());
            Ok(data.len())
        })
    }

    fn flush(&self) -> SinkFuture<'_, ()> {
        Box::pin(async move {
            self.flushes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn close(&self) -> SinkFuture<'_, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_sink_records_writes() {
        let sink = MemorySink::new();
        sink.write(b"one\n").await.unwrap();
        sink.write(b"two\n").await.unwrap();

        assert_eq!(sink.write_count(), 2);
        assert_eq!(sink.contents(), b"one\ntwo\n");
    }

    #[tokio::test]
    async fn test_memory_sink_rejects_after_close() {
        let sink = MemorySink::new();
        sink.close().await.unwrap();
        sink.close().await.unwrap();

        assert!(matches!(sink.write(b"late").await, Err(SinkError::Closed)));
        assert!(sink.is_closed());
    }
}
