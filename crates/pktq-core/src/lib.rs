//! # pktq Core
//!
//! Platform-independent queued packet-filter pipeline.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Intermediate buffers and packet blocks** - Preallocated packet storage
//! - **Tap driver interface** - What the pipeline needs from a capture backend
//! - **Classifiers** - Caller-supplied per-packet verdicts
//! - **Stage workers** - Capture, classify, stack and wire injection
//! - **Filter controller** - Start/stop/reconfigure/release lifecycle
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pktq_core::{
//!     AdapterHandle, Direction, FilterConfig, IntermediateBuffer, QueuedPacketFilter,
//!     TapDriver, Verdict,
//! };
//!
//! fn run(driver: Arc<dyn TapDriver>) -> pktq_core::Result<()> {
//!     let filter = QueuedPacketFilter::builder(driver)
//!         .config(FilterConfig::load("pktq.toml")?)
//!         .outbound(|_: AdapterHandle, _: Direction, buffer: &mut IntermediateBuffer| {
//!             if buffer.len() > 1400 { Verdict::Drop } else { Verdict::Pass }
//!         })
//!         .build()?;
//!
//!     println!("{:?}", filter.interface_names());
//!     filter.start(0)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod classify;
pub mod config;
pub mod driver;
pub mod error;
pub mod filter;
pub mod packet;
pub mod pipeline;

// Re-exports for convenience
pub use adapter::NetworkAdapter;
pub use classify::{Classifiers, FixedVerdict, PacketClassifier, PassThrough, Verdict};
pub use config::FilterConfig;
pub use driver::{AdapterHandle, AdapterInfo, AdapterMode, EventHandle, TapDriver};
pub use error::{Error, Result};
pub use filter::{FilterBuilder, FilterState, QueuedPacketFilter};
pub use packet::{Direction, DirectionFlags, IntermediateBuffer, MAX_ETHER_FRAME};
pub use pipeline::{BatchView, PipelineStats, PoolCensus, StatsSnapshot};
