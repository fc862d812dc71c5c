use crate::config::ConfigError;
use crate::config::validation::{compile_pattern, require_positive_duration};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    Gzip,
    Zlib,
}

impl CompressionAlgorithm {
    /// Suffix appended to the source file name.
    pub fn extension(self) -> &'static str {
        match self {
            CompressionAlgorithm::Gzip => "gz",
            CompressionAlgorithm::Zlib => "zz",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressConfig {
    pub enabled: bool,
    pub algorithm: CompressionAlgorithm,
    /// 0 (store) through 9 (best).
    pub level: u32,
    pub delete_source: bool,
    #[serde(with = "crate::config::serde_helpers")]
    pub interval: Duration,
    /// Files, or directories whose matching files are compacted. Empty means
    /// the directory of the pipeline output.
    pub paths: Vec<PathBuf>,
    /// Regex on file names inside directory paths.
    pub file_pattern: Option<String>,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            algorithm: CompressionAlgorithm::Gzip,
            level: 6,
            delete_source: true,
            interval: Duration::from_secs(300),
            paths: Vec::new(),
            file_pattern: None,
        }
    }
}

impl CompressConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive_duration("compress.interval", self.interval)?;
        if self.level > 9 {
            return Err(ConfigError::InvalidConfig(format!(
                "compress.level must be between 0 and 9, got {}",
                self.level
            )));
        }
        compile_pattern("compress.file_pattern", self.file_pattern.as_deref())?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    #[serde(with = "crate::config::serde_helpers")]
    pub interval: Duration,
    /// Empty means the directory of the pipeline output.
    pub directories: Vec<PathBuf>,
    pub file_pattern: Option<String>,
    /// Newest files kept per directory; 0 keeps all.
    pub max_backups: usize,
    #[serde(with = "crate::config::serde_helpers::optional")]
    pub max_age: Option<Duration>,
    /// Per-directory quota; the newest file always survives.
    pub max_total_bytes: Option<u64>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(3600),
            directories: Vec::new(),
            file_pattern: None,
            max_backups: 0,
            max_age: None,
            max_total_bytes: None,
        }
    }
}

impl CleanupConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive_duration("cleanup.interval", self.interval)?;
        compile_pattern("cleanup.file_pattern", self.file_pattern.as_deref())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compress_level_bounds() {
        let config = CompressConfig {
            enabled: true,
            level: 10,
            paths: vec![PathBuf::from("/var/log/app")],
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("level"));
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let config = CleanupConfig {
            enabled: true,
            directories: vec![PathBuf::from("/var/log/app")],
            file_pattern: Some("app(".to_string()),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("file_pattern"));
    }

    #[test]
    fn test_algorithm_extensions() {
        assert_eq!(CompressionAlgorithm::Gzip.extension(), "gz");
        assert_eq!(CompressionAlgorithm::Zlib.extension(), "zz");
    }

    #[test]
    fn test_cleanup_from_toml() {
        let config: CleanupConfig = toml::from_str(
            r#"
            enabled = true
            directories = ["/var/log/app"]
            max_total_bytes = 1048576
            "#,
        )
        .unwrap();
        assert_eq!(config.max_total_bytes, Some(1024 * 1024));
        assert_eq!(config.max_age, None);
        assert!(config.validate().is_ok());
    }
}
