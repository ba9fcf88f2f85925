//! Bounded block queues connecting the stages
//!
//! The four queues form a ring. Each is bounded to the pool size, so the
//! number of blocks in flight can never exceed the pool.

use super::block::PacketBlock;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One bounded queue of packet blocks
#[derive(Debug, Clone)]
pub struct BlockQueue {
    name: &'static str,
    tx: Sender<PacketBlock>,
    rx: Receiver<PacketBlock>,
}

impl BlockQueue {
    fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { name, tx, rx }
    }

    /// Queue name, for logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Producer end
    pub fn sender(&self) -> &Sender<PacketBlock> {
        &self.tx
    }

    /// Consumer end
    pub fn receiver(&self) -> &Receiver<PacketBlock> {
        &self.rx
    }

    /// Blocks currently queued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Remove and drop every queued block, returning how many there were
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

/// The four stage queues of one filter
#[derive(Debug, Clone)]
pub struct BlockQueues {
    /// Blocks waiting for capture
    pub capture: BlockQueue,
    /// Captured blocks waiting for classification
    pub classify: BlockQueue,
    /// Classified blocks waiting for stack injection
    pub stack: BlockQueue,
    /// Blocks waiting for wire injection
    pub wire: BlockQueue,
    held: Arc<AtomicUsize>,
}

/// Where the pool's blocks are right now
///
/// Exact only while the pipeline is quiescent; while running, a block that
/// is crossing a stage boundary may be seen in neither place or both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolCensus {
    /// Blocks in the capture queue
    pub capture: usize,
    /// Blocks in the classify queue
    pub classify: usize,
    /// Blocks in the stack queue
    pub stack: usize,
    /// Blocks in the wire queue
    pub wire: usize,
    /// Blocks owned by a stage worker
    pub held: usize,
}

impl PoolCensus {
    /// All blocks accounted for
    pub fn total(&self) -> usize {
        self.capture + self.classify + self.stack + self.wire + self.held
    }

    /// Blocks sitting in queues
    pub fn queued(&self) -> usize {
        self.capture + self.classify + self.stack + self.wire
    }
}

impl BlockQueues {
    /// Create the four queues, each bounded to `pool_size`
    pub fn new(pool_size: usize) -> Self {
        Self {
            capture: BlockQueue::new("capture", pool_size),
            classify: BlockQueue::new("classify", pool_size),
            stack: BlockQueue::new("stack", pool_size),
            wire: BlockQueue::new("wire", pool_size),
            held: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queues in ring order
    pub fn iter(&self) -> impl Iterator<Item = &BlockQueue> {
        [&self.capture, &self.classify, &self.stack, &self.wire].into_iter()
    }

    /// Count blocks per location
    pub fn census(&self) -> PoolCensus {
        PoolCensus {
            capture: self.capture.len(),
            classify: self.classify.len(),
            stack: self.stack.len(),
            wire: self.wire.len(),
            held: self.held.load(Ordering::SeqCst),
        }
    }

    /// Empty every queue, returning the number of blocks dropped
    pub fn drain_all(&self) -> usize {
        self.iter().map(BlockQueue::drain).sum()
    }

    pub(crate) fn held_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.held)
    }

    pub(crate) fn reset_held(&self) {
        self.held.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::AdapterHandle;

    #[test]
    fn test_census_and_drain() {
        let queues = BlockQueues::new(3);
        for _ in 0..3 {
            queues
                .capture
                .sender()
                .send(PacketBlock::new(AdapterHandle(1), 2))
                .unwrap();
        }
        queues
            .wire
            .sender()
            .try_send(PacketBlock::new(AdapterHandle(1), 2))
            .unwrap();

        let census = queues.census();
        assert_eq!(census.capture, 3);
        assert_eq!(census.wire, 1);
        assert_eq!(census.total(), 4);

        assert_eq!(queues.drain_all(), 4);
        assert_eq!(queues.census().total(), 0);
    }

    #[test]
    fn test_queues_are_bounded() {
        let queues = BlockQueues::new(1);
        queues
            .stack
            .sender()
            .try_send(PacketBlock::new(AdapterHandle(1), 1))
            .unwrap();
        assert!(queues
            .stack
            .sender()
            .try_send(PacketBlock::new(AdapterHandle(1), 1))
            .is_err());
    }
}
