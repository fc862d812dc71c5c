use crate::config::ConfigError;
use crate::config::validation::{require_nonzero, require_positive_duration};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Capacity of the shared input channel.
    pub max_queue_size: usize,
    /// Records per batch before a worker flushes.
    pub batch_size: usize,
    /// Period of each worker's flush tick.
    #[serde(with = "crate::config::serde_helpers")]
    pub flush_interval: Duration,
    pub worker_count: usize,
    /// Attempts after the first failed delivery of a batch.
    pub retry_count: u32,
    /// Base of the linear backoff between attempts.
    #[serde(with = "crate::config::serde_helpers")]
    pub retry_interval: Duration,
    /// Longest a record may sit in a batch before the batch is flushed.
    #[serde(with = "crate::config::serde_helpers")]
    pub max_batch_wait: Duration,
    #[serde(with = "crate::config::serde_helpers")]
    pub shutdown_timeout: Duration,
    /// How long `write` may wait on a full channel before rejecting.
    #[serde(with = "crate::config::serde_helpers")]
    pub enqueue_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
            worker_count: 4,
            retry_count: 3,
            retry_interval: Duration::from_millis(100),
            max_batch_wait: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
            enqueue_timeout: Duration::from_millis(5),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("queue.max_queue_size", self.max_queue_size)?;
        require_nonzero("queue.batch_size", self.batch_size)?;
        require_positive_duration("queue.flush_interval", self.flush_interval)?;
        require_nonzero("queue.worker_count", self.worker_count)?;
        require_nonzero("queue.retry_count", self.retry_count as usize)?;
        require_positive_duration("queue.retry_interval", self.retry_interval)?;
        require_positive_duration("queue.max_batch_wait", self.max_batch_wait)?;
        require_positive_duration("queue.shutdown_timeout", self.shutdown_timeout)?;
        require_positive_duration("queue.enqueue_timeout", self.enqueue_timeout)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(QueueConfig::default().validate().is_ok());
    }

    #[test]
    fn test_each_zero_field_is_rejected() {
        let cases: Vec<(&str, QueueConfig)> = vec![
            ("max_queue_size", QueueConfig { max_queue_size: 0, ..Default::default() }),
            ("batch_size", QueueConfig { batch_size: 0, ..Default::default() }),
            ("flush_interval", QueueConfig { flush_interval: Duration::ZERO, ..Default::default() }),
            ("worker_count", QueueConfig { worker_count: 0, ..Default::default() }),
            ("retry_count", QueueConfig { retry_count: 0, ..Default::default() }),
            ("retry_interval", QueueConfig { retry_interval: Duration::ZERO, ..Default::default() }),
            ("max_batch_wait", QueueConfig { max_batch_wait: Duration::ZERO, ..Default::default() }),
            ("shutdown_timeout", QueueConfig { shutdown_timeout: Duration::ZERO, ..Default::default() }),
            ("enqueue_timeout", QueueConfig { enqueue_timeout: Duration::ZERO, ..Default::default() }),
        ];

        for (field, config) in cases {
            let err = config.validate().unwrap_err();
            assert!(
                err.to_string().contains(field),
                "error for {field} should name the field, got: {err}"
            );
        }
    }
}
