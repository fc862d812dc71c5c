use super::pool::BufferPool;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// What caused a batch to be flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchType {
    SizeBased,
    TimeBased,
    Shutdown,
}

/// Records accumulated by one worker since its last flush.
///
/// Owned by exactly one task; never shared.
#[derive(Debug, Default)]
pub struct Batch {
    records: Vec<Bytes>,
    bytes: usize,
    started_at: Option<Instant>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            bytes: 0,
            started_at: None,
        }
    }

    pub fn push(&mut self, record: Bytes) {
        if self.records.is_empty() {
            self.started_at = Some(Instant::now());
        }
        self.bytes += record.len();
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total payload bytes across all records.
    pub fn byte_size(&self) -> usize {
        self.bytes
    }

    /// Instant at which the oldest record has waited `max_wait`.
    pub fn deadline(&self, max_wait: Duration) -> Option<Instant> {
        self.started_at.map(|started| started + max_wait)
    }

    /// Concatenate all records, in arrival order, into a pooled buffer.
    pub fn concat_into(&self, pool: &BufferPool) -> Vec<u8> {
        let mut buf = pool.acquire();
        buf.reserve(self.bytes);
        for record in &self.records {
            buf.extend_from_slice(record);
        }
        buf
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.bytes = 0;
        self.started_at = None;
    }
}
