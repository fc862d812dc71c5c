use crate::buffer::OnFullPolicy;
use crate::config::ConfigError;
use crate::config::validation::{require_nonzero, require_positive_duration};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncConfig {
    /// When false the writer forwards every write synchronously.
    pub enabled: bool,
    /// Capacity of the pending-record channel, also the flush threshold.
    pub buffer_size: usize,
    #[serde(with = "crate::config::serde_helpers")]
    pub flush_interval: Duration,
    pub on_full: OnFullPolicy,
    /// Deliver everything already enqueued when stopping.
    pub flush_on_exit: bool,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: 1000,
            flush_interval: Duration::from_secs(1),
            on_full: OnFullPolicy::Drop,
            flush_on_exit: true,
        }
    }
}

impl AsyncConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        require_nonzero("async_writer.buffer_size", self.buffer_size)?;
        require_positive_duration("async_writer.flush_interval", self.flush_interval)?;
        Ok(())
    }
}
