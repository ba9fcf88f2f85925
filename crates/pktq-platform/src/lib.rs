//! pktq Platform Layer
//!
//! Tap driver backends for the queued packet filter.
//!
//! ## Backends
//!
//! - **Memory**: in-process simulated tap with fault injection, used by
//!   tests and the `pktq run` simulator

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
pub use error::{PlatformError, Result};

pub mod memory;
pub use memory::{Delivery, Injected, MemoryTap, Sink, DEFAULT_FRAME_LOG_LIMIT};
