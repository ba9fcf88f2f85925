//! Platform-specific errors

use pktq_core::{AdapterHandle, Error as CoreError, EventHandle};
use thiserror::Error;

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Adapter handle is not known to the driver
    #[error("Adapter not found: {0}")]
    AdapterNotFound(AdapterHandle),

    /// Event handle is not registered
    #[error("Packet event not found: {0:?}")]
    EventNotFound(EventHandle),

    /// Adapter enumeration failed
    #[error("Enumeration failed: {0}")]
    EnumerationFailed(String),

    /// Packet capture error
    #[error("Capture error: {0}")]
    CaptureError(String),

    /// Packet injection error
    #[error("Injection error: {0}")]
    InjectionError(String),

    /// Frame does not fit an intermediate buffer
    #[error("Frame of {len} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Frame length
        len: usize,
        /// Maximum frame length
        max: usize,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Platform result type
pub type Result<T> = std::result::Result<T, PlatformError>;

impl PlatformError {
    /// Driver operation the error belongs to
    pub fn operation(&self) -> &'static str {
        match self {
            Self::AdapterNotFound(_) => "adapter lookup",
            Self::EventNotFound(_) => "event lookup",
            Self::EnumerationFailed(_) => "enumerate_adapters",
            Self::CaptureError(_) => "read_batch",
            Self::InjectionError(_) => "send_batch",
            Self::FrameTooLarge { .. } => "frame copy",
            Self::Io(_) => "io",
        }
    }

    /// Whether a retry of the same operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::CaptureError(_) | Self::InjectionError(_))
    }
}

impl From<PlatformError> for CoreError {
    fn from(err: PlatformError) -> Self {
        let operation = err.operation();
        match err {
            PlatformError::FrameTooLarge { len, max } => CoreError::FrameTooLarge { len, max },
            PlatformError::EnumerationFailed(message) => CoreError::Enumeration(message),
            err if err.is_transient() => CoreError::transient_io(operation, err.to_string()),
            err => CoreError::driver(operation, err.to_string()),
        }
    }
}
