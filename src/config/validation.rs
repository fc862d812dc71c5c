use super::ConfigError;
use std::time::Duration;

/// Rejects a zero count or size.
pub fn require_nonzero(field: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidConfig(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

/// Rejects a zero duration.
pub fn require_positive_duration(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidConfig(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

/// Compiles an optional file-name pattern.
pub fn compile_pattern(
    field: &str,
    pattern: Option<&str>,
) -> Result<Option<regex::Regex>, ConfigError> {
    pattern
        .map(|p| {
            regex::Regex::new(p).map_err(|e| {
                ConfigError::InvalidConfig(format!("{field} is not a valid pattern '{p}': {e}"))
            })
        })
        .transpose()
}
