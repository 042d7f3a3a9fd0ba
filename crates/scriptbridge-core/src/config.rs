//! Bridge configuration.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

/// Default interval between checks of the pending input slot.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default run log history limit (16 MB).
pub const DEFAULT_HISTORY_LIMIT_BYTES: usize = 16 * 1024 * 1024;

/// Tunables shared by both sides of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How often a script blocked in `read` re-checks for an answer.
    pub input_poll_interval_ms: u64,
    /// Byte budget of the run log's replay transcript. Accumulated output is never trimmed.
    pub history_limit_bytes: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            input_poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            history_limit_bytes: DEFAULT_HISTORY_LIMIT_BYTES,
        }
    }
}

impl BridgeConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    /// Returns error if the document is invalid.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or is invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&raw)?;
        tracing::debug!(path = %path.display(), ?config, "Loaded bridge config");
        Ok(config)
    }

    /// Poll interval as a duration.
    #[must_use]
    pub const fn input_poll_interval(&self) -> Duration {
        Duration::from_millis(self.input_poll_interval_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.input_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "input_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.input_poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BridgeConfig::from_toml("input_poll_interval_ms = 10").unwrap();
        assert_eq!(config.input_poll_interval_ms, 10);
        assert_eq!(config.history_limit_bytes, DEFAULT_HISTORY_LIMIT_BYTES);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = BridgeConfig::from_toml("input_poll_interval_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = BridgeConfig::load(Path::new("/nonexistent/scriptbridge.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
