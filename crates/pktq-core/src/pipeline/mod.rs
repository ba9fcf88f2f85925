//! Packet pipeline
//!
//! Blocks circulate capture → classify → stack → wire → capture through four
//! bounded queues, one worker per stage.

mod block;
mod cancel;
mod queue;
pub(crate) mod stages;
mod stats;

pub use block::{BatchView, ClassifySummary, PacketBlock, WriteRequest};
pub use cancel::{CancelSource, CancelToken};
pub use queue::{BlockQueue, BlockQueues, PoolCensus};
pub use stages::Stage;
pub use stats::{PipelineStats, StatsSnapshot};
