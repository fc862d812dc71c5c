use crate::config::ConfigError;
use crate::config::validation::{require_nonzero, require_positive_duration};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileTargetConfig {
    /// Bytes buffered per file before they are written and synced.
    pub buffer_size: usize,
    #[serde(with = "crate::config::serde_helpers")]
    pub flush_interval: Duration,
    /// Handles unused for this long are flushed and closed.
    #[serde(with = "crate::config::serde_helpers")]
    pub idle_timeout: Duration,
    #[serde(with = "crate::config::serde_helpers")]
    pub eviction_interval: Duration,
    pub max_open_files: usize,
    /// Rotate a file once it reaches this many bytes on disk.
    pub max_file_size: Option<u64>,
}

impl Default for FileTargetConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            flush_interval: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(300),
            eviction_interval: Duration::from_secs(30),
            max_open_files: 64,
            max_file_size: None,
        }
    }
}

impl FileTargetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("target.buffer_size", self.buffer_size)?;
        require_positive_duration("target.flush_interval", self.flush_interval)?;
        require_positive_duration("target.idle_timeout", self.idle_timeout)?;
        require_positive_duration("target.eviction_interval", self.eviction_interval)?;
        require_nonzero("target.max_open_files", self.max_open_files)?;
        if self.max_file_size == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "target.max_file_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(FileTargetConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_max_file_size_rejected() {
        let config = FileTargetConfig {
            max_file_size: Some(0),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("max_file_size"));
    }

    #[test]
    fn test_max_open_files_required() {
        let config = FileTargetConfig {
            max_open_files: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
