use serde::{Deserialize, Serialize};

/// What a bounded buffer does with a write when it has no room left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OnFullPolicy {
    /// Wait for capacity; pushes the pressure back to the producer.
    Block,
    /// Count the write as dropped and report success.
    #[default]
    Drop,
}

impl OnFullPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            OnFullPolicy::Block => "block",
            OnFullPolicy::Drop => "drop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackpressureLevel {
    None,
    Low,
    Medium,
    High,
}

impl BackpressureLevel {
    pub fn from_fill_ratio(ratio: f64) -> Self {
        if ratio < 0.5 {
            BackpressureLevel::None
        } else if ratio < 0.8 {
            BackpressureLevel::Low
        } else if ratio < 0.95 {
            BackpressureLevel::Medium
        } else {
            BackpressureLevel::High
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parses_from_lowercase() {
        #[derive(Deserialize)]
        struct Holder {
            on_full: OnFullPolicy,
        }

        let holder: Holder = toml::from_str(r#"on_full = "block""#).unwrap();
        assert_eq!(holder.on_full, OnFullPolicy::Block);
        assert_eq!(OnFullPolicy::default(), OnFullPolicy::Drop);
    }

    #[test]
    fn test_backpressure_levels() {
        assert_eq!(BackpressureLevel::from_fill_ratio(0.1), BackpressureLevel::None);
        assert_eq!(BackpressureLevel::from_fill_ratio(0.6), BackpressureLevel::Low);
        assert_eq!(BackpressureLevel::from_fill_ratio(0.9), BackpressureLevel::Medium);
        assert_eq!(BackpressureLevel::from_fill_ratio(1.0), BackpressureLevel::High);
    }
}
