//! Filter configuration
//!
//! Pool and block sizing for a [`QueuedPacketFilter`](crate::QueuedPacketFilter),
//! loadable from TOML. Every field has a default so partial files work.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest block the pipeline accepts
pub const MAX_PACKETS_PER_BLOCK: usize = 4096;

/// Pipeline sizing and timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Number of packet blocks preallocated at start
    pub pool_size: usize,
    /// Intermediate buffers per block
    pub packets_per_block: usize,
    /// How long capture waits on the adapter event before rechecking for
    /// cancellation, in milliseconds
    pub event_poll_interval_ms: u64,
    /// Prefix for stage worker thread names
    pub thread_name_prefix: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            packets_per_block: 256,
            event_poll_interval_ms: 100,
            thread_name_prefix: "pktq".to_string(),
        }
    }
}

impl FilterConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| Error::ConfigNotFound {
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::config_value("pool_size", "must be at least 1"));
        }
        if self.packets_per_block == 0 || self.packets_per_block > MAX_PACKETS_PER_BLOCK {
            return Err(Error::config_value(
                "packets_per_block",
                format!("must be between 1 and {MAX_PACKETS_PER_BLOCK}"),
            ));
        }
        if self.event_poll_interval_ms == 0 {
            return Err(Error::config_value(
                "event_poll_interval_ms",
                "must be at least 1",
            ));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(Error::config_value(
                "thread_name_prefix",
                "must not be empty",
            ));
        }
        Ok(())
    }

    /// Serialize configuration to a TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Event wait slice
    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(self.event_poll_interval_ms)
    }

    /// Buffers preallocated per session
    pub fn buffer_count(&self) -> usize {
        self.pool_size.saturating_mul(self.packets_per_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FilterConfig::default();
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.packets_per_block, 256);
        assert_eq!(config.event_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.thread_name_prefix, "pktq");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = FilterConfig::from_toml("pool_size = 4").unwrap();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.packets_per_block, 256);
        assert_eq!(config.buffer_count(), 1024);
    }

    #[test]
    fn test_validate_rejects_empty_pool() {
        let config = FilterConfig {
            pool_size: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool_size"));
    }

    #[test]
    fn test_validate_block_bounds() {
        for packets_per_block in [0, MAX_PACKETS_PER_BLOCK + 1] {
            let config = FilterConfig {
                packets_per_block,
                ..Default::default()
            };
            assert!(config.validate().is_err());
        }

        let config = FilterConfig {
            packets_per_block: MAX_PACKETS_PER_BLOCK,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_poll_interval() {
        let config = FilterConfig {
            event_poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = FilterConfig {
            pool_size: 3,
            packets_per_block: 64,
            event_poll_interval_ms: 5,
            thread_name_prefix: "tap".into(),
        };
        let parsed = FilterConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = FilterConfig::load("/nonexistent/pktq.toml").unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound { .. }));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            FilterConfig::from_toml("pool_size = \"many\""),
            Err(Error::TomlParse(_))
        ));
    }
}
