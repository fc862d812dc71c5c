//! Reusable byte buffers for batch concatenation.
//!
//! Released buffers are cleared and parked until the next `acquire`, so the
//! flush path does not allocate once the pool is warm. The pool is purely an
//! optimization: a fresh `Vec` per flush behaves identically.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of parked buffers.
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Initial capacity of buffers created on a pool miss.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Buffers that grew beyond this are not parked again.
pub const MAX_POOLED_CAPACITY: usize = 4 * 1024 * 1024;

#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
    buffer_capacity: usize,
    metrics: BufferPoolMetrics,
}

#[derive(Debug, Default)]
struct BufferPoolMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    returns: AtomicU64,
    drops: AtomicU64,
}

/// Point-in-time view of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub returns: u64,
    pub drops: u64,
    pub pooled: usize,
}

impl BufferPoolSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            1.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl BufferPool {
    pub fn new(max_pooled: usize, buffer_capacity: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_pooled)),
            max_pooled,
            buffer_capacity,
            metrics: BufferPoolMetrics::default(),
        }
    }

    /// Take an empty buffer, reusing a parked one when available.
    pub fn acquire(&self) -> Vec<u8> {
        if let Some(buf) = self.buffers.lock().pop() {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            return buf;
        }
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);
        Vec::with_capacity(self.buffer_capacity)
    }

    /// Hand a buffer back. Its contents are discarded, its capacity kept.
    pub fn release(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_POOLED_CAPACITY {
            self.metrics.drops.fetch_add(1, Ordering::Relaxed);
            return;
        }
        buf.clear();

        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_pooled {
            buffers.push(buf);
            self.metrics.returns.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.drops.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> BufferPoolSnapshot {
        BufferPoolSnapshot {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            returns: self.metrics.returns.load(Ordering::Relaxed),
            drops: self.metrics.drops.load(Ordering::Relaxed),
            pooled: self.buffers.lock().len(),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE, DEFAULT_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_miss_then_hit() {
        let pool = BufferPool::new(4, 128);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 128);
        pool.release(buf);

        let _reused = pool.acquire();
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.returns, 1);
    }

    #[test]
    fn test_release_clears_but_keeps_capacity() {
        let pool = BufferPool::new(4, 16);
        let mut buf = pool.acquire();
        buf.extend_from_slice(&[7u8; 1000]);
        let capacity = buf.capacity();
        pool.release(buf);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), capacity);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = BufferPool::new(2, 16);
        let buffers: Vec<_> = (0..3).map(|_| pool.acquire()).collect();
        for buf in buffers {
            pool.release(buf);
        }

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.pooled, 2);
        assert_eq!(snapshot.drops, 1);
    }

    #[test]
    fn test_oversized_buffers_are_not_pooled() {
        let pool = BufferPool::new(2, 16);
        pool.release(Vec::with_capacity(MAX_POOLED_CAPACITY + 1));
        assert_eq!(pool.snapshot().pooled, 0);
        assert_eq!(pool.snapshot().drops, 1);
    }

    #[test]
    fn test_hit_rate() {
        let snapshot = BufferPoolSnapshot {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((snapshot.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert!((BufferPoolSnapshot::default().hit_rate() - 1.0).abs() < f64::EPSILON);
    }
}
