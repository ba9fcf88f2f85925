//! Error types for pktq-core
//!
//! Centralized error handling using `thiserror` for ergonomic error definitions.

use thiserror::Error;

/// Main error type for pktq-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Lifecycle operation invoked from an incompatible filter state
    #[error("Illegal filter state: {0}")]
    IllegalState(&'static str),

    /// Adapter event registration or mode change failed during start
    #[error("Failed to acquire {resource} for adapter '{adapter}': {message}")]
    ResourceAcquisition {
        /// Resource that could not be acquired
        resource: &'static str,
        /// Adapter display name
        adapter: String,
        /// Error message
        message: String,
    },

    /// Batched read or send failed or was only partially accepted
    #[error("Transient I/O failure during {operation}: {message}")]
    TransientIo {
        /// Driver operation that failed
        operation: &'static str,
        /// Error message
        message: String,
    },

    /// Adapter discovery failed
    #[error("Adapter enumeration failed: {0}")]
    Enumeration(String),

    /// Adapter index does not refer to a discovered adapter
    #[error("Invalid adapter index {index} ({count} adapters available)")]
    InvalidAdapter {
        /// Requested index
        index: usize,
        /// Number of adapters in the current snapshot
        count: usize,
    },

    /// Frame does not fit into an intermediate buffer
    #[error("Frame too large: {len} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Frame length
        len: usize,
        /// Buffer capacity
        max: usize,
    },

    /// Tap driver reported an error
    #[error("Tap driver error in {operation}: {message}")]
    Driver {
        /// Driver operation that failed
        operation: &'static str,
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// Path to the missing config file
        path: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    ConfigValue {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// Worker thread could not be spawned
    #[error("Failed to spawn {stage} worker: {source}")]
    Spawn {
        /// Stage name
        stage: &'static str,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a driver error
    pub fn driver(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Driver {
            operation,
            message: message.into(),
        }
    }

    /// Create a transient I/O error
    pub fn transient_io(operation: &'static str, message: impl Into<String>) -> Self {
        Self::TransientIo {
            operation,
            message: message.into(),
        }
    }

    /// Create a resource acquisition error
    pub fn resource(
        resource: &'static str,
        adapter: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ResourceAcquisition {
            resource,
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    /// Create a config value error
    pub fn config_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether this error is an illegal lifecycle transition
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::IllegalState("not stopped");
        assert!(err.to_string().contains("not stopped"));

        let err = Error::resource("packet event", "Ethernet 2", "access denied");
        assert!(err.to_string().contains("packet event"));
        assert!(err.to_string().contains("Ethernet 2"));
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_illegal_state_predicate() {
        assert!(Error::IllegalState("not running").is_illegal_state());
        assert!(!Error::Enumeration("no driver".into()).is_illegal_state());
    }

    #[test]
    fn test_invalid_adapter_message() {
        let err = Error::InvalidAdapter { index: 7, count: 2 };
        match err {
            Error::InvalidAdapter { index, count } => {
                assert_eq!(index, 7);
                assert_eq!(count, 2);
            }
            _ => panic!("Wrong error type"),
        }
    }
}
