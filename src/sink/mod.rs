//! The narrow write interface every pipeline layer speaks.
//!
//! A sink is anything that accepts an ordered stream of byte writes. Files,
//! the write queue, the recovery wrapper and the async writer all implement
//! [`LogSink`], so layers compose by wrapping an `Arc<dyn LogSink>`.

pub mod memory;

pub use memory::MemorySink;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Boxed future returned by [`LogSink`] methods.
pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SinkError>> + Send + 'a>>;

/// Shared, type-erased sink handle.
pub type SharedSink = Arc<dyn LogSink>;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink is closed")]
    Closed,

    #[error("Queue is full")]
    QueueFull,

    #[error("Queue is not running")]
    NotRunning,

    #[error("Invalid state transition: {0}")]
    InvalidState(&'static str),

    #[error("Sink panicked: {0}")]
    Panicked(String),

    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Write failed: {0}")]
    Failed(String),
}

impl SinkError {
    /// Whether retrying the same payload can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Io(_) | SinkError::QueueFull | SinkError::Failed(_))
    }
}

pub trait LogSink: Send + Sync {
    /// Deliver one write. Returns the number of bytes accepted.
    fn write<'a>(&'a self, data: &'a [u8]) -> SinkFuture<'a, usize>;

    fn flush(&self) -> SinkFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> SinkFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn write<'a>(&'a self, data: &'a [u8]) -> SinkFuture<'a, usize> {
        (**self).write(data)
    }

    fn flush(&self) -> SinkFuture<'_, ()> {
        (**self).flush()
    }

    fn close(&self) -> SinkFuture<'_, ()> {
        (**self).close()
    }
}

/// Details handed to an [`ErrorHandler`] for every failed delivery attempt.
#[derive(Debug)]
pub struct DeliveryFailure<'a> {
    pub error: &'a SinkError,
    /// 1-based attempt number that failed.
    pub attempt: u32,
    /// Size of the payload that failed.
    pub bytes: usize,
    /// True when no further attempt will be made for this payload.
    pub exhausted: bool,
}

pub type ErrorHandler = Arc<dyn Fn(&DeliveryFailure<'_>) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SinkError::Io(std::io::Error::other("disk")).is_transient());
        assert!(SinkError::Failed("boom".into()).is_transient());
        assert!(!SinkError::Panicked("boom".into()).is_transient());
        assert!(!SinkError::Closed.is_transient());
        assert!(!SinkError::ShutdownTimeout(Duration::from_secs(1)).is_transient());
    }

    #[tokio::test]
    async fn test_arc_forwarding() {
        let sink = Arc::new(MemorySink::new());
        let shared: SharedSink = sink.clone();

        assert_eq!(shared.write(b"abc").await.unwrap(), 3);
        shared.flush().await.unwrap();
        shared.close().await.unwrap();

        assert_eq!(sink.contents(), b"abc");
    }
}
