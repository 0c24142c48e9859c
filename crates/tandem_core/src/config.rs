//! # Runtime Configuration
//!
//! Loaded once at startup from TOML. Every field has a default so a partial
//! file (or none at all) is valid.
//!
//! ```toml
//! max_delta_time = 0.05
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tandem_shared::constants::MAX_DELTA_TIME;

/// Frame loop configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Largest delta (seconds) a single tick may advance time by.
    pub max_delta_time: f32,
    /// Log hook failures at error level. When false they log at debug.
    pub log_hook_errors: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_delta_time: MAX_DELTA_TIME,
            log_hook_errors: true,
        }
    }
}

impl RuntimeConfig {
    /// Parses a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("max_delta_time = 0.05").unwrap();
        assert!((config.max_delta_time - 0.05).abs() < f32::EPSILON);
        assert!(config.log_hook_errors);
    }

    #[test]
    fn test_empty_config() {
        assert_eq!(RuntimeConfig::from_toml_str("").unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("max_delta_time = \"fast\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
