//! Packet blocks
//!
//! A [`PacketBlock`] owns a fixed arena of intermediate buffers plus the
//! three batch requests that refer into it. Blocks are created once per
//! filter session and then circulate through the stages; nothing inside a
//! block is allocated after construction.

use crate::classify::{Classifiers, Verdict};
use crate::driver::AdapterHandle;
use crate::packet::{Direction, IntermediateBuffer};

/// Batched read request: how many buffers the last capture filled
#[derive(Debug, Clone, Copy)]
struct ReadRequest {
    adapter: AdapterHandle,
    packets_success: usize,
}

/// Batched write request: positions in the block's arena to inject
#[derive(Debug)]
pub struct WriteRequest {
    adapter: AdapterHandle,
    packets: Vec<usize>,
}

impl WriteRequest {
    fn with_capacity(adapter: AdapterHandle, capacity: usize) -> Self {
        Self {
            adapter,
            packets: Vec::with_capacity(capacity),
        }
    }

    /// Adapter the batch is injected through
    pub fn adapter(&self) -> AdapterHandle {
        self.adapter
    }

    /// Number of packets in the batch
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Arena positions in capture order
    pub fn packets(&self) -> &[usize] {
        &self.packets
    }

    fn push(&mut self, index: usize) {
        // Each arena slot is pushed at most once per pass, so this never
        // grows past the preallocated capacity.
        debug_assert!(self.packets.len() < self.packets.capacity());
        self.packets.push(index);
    }

    fn clear(&mut self) {
        self.packets.clear();
    }
}

/// Borrowed view of one write batch
///
/// Tap drivers receive the block's buffer arena and the batch positions;
/// this wrapper walks them in batch order.
#[derive(Debug, Clone, Copy)]
pub struct BatchView<'a> {
    buffers: &'a [IntermediateBuffer],
    packets: &'a [usize],
}

impl<'a> BatchView<'a> {
    /// Pair an arena with batch positions
    pub fn new(buffers: &'a [IntermediateBuffer], packets: &'a [usize]) -> Self {
        Self { buffers, packets }
    }

    /// Number of packets in the batch
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Buffers in batch order. Out-of-range positions are skipped.
    pub fn iter(&self) -> impl Iterator<Item = &'a IntermediateBuffer> + 'a {
        let buffers = self.buffers;
        self.packets.iter().filter_map(move |&i| buffers.get(i))
    }
}

/// Counts produced by one classify pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifySummary {
    /// Packets classified
    pub classified: usize,
    /// Packets bucketed for the protocol stack
    pub to_stack: usize,
    /// Packets bucketed for the wire
    pub to_wire: usize,
    /// Packets dropped
    pub dropped: usize,
    /// Packets whose verdict was redirect
    pub redirected: usize,
}

/// Reusable unit of packet storage circulating through the pipeline
#[derive(Debug)]
pub struct PacketBlock {
    buffers: Box<[IntermediateBuffer]>,
    read: ReadRequest,
    to_stack: WriteRequest,
    to_wire: WriteRequest,
}

impl PacketBlock {
    /// Allocate a block of `capacity` buffers for `adapter`
    pub fn new(adapter: AdapterHandle, capacity: usize) -> Self {
        let buffers = (0..capacity)
            .map(|_| IntermediateBuffer::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            buffers,
            read: ReadRequest {
                adapter,
                packets_success: 0,
            },
            to_stack: WriteRequest::with_capacity(adapter, capacity),
            to_wire: WriteRequest::with_capacity(adapter, capacity),
        }
    }

    /// Number of buffers in the arena
    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    /// Adapter this block belongs to
    pub fn adapter(&self) -> AdapterHandle {
        self.read.adapter
    }

    /// Buffers captured and not yet classified
    pub fn packets_success(&self) -> usize {
        self.read.packets_success
    }

    /// Free buffers left for capture
    pub fn remaining(&self) -> usize {
        self.capacity() - self.read.packets_success
    }

    /// Whether capture filled every buffer
    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Whole buffer arena
    pub fn buffers(&self) -> &[IntermediateBuffer] {
        &self.buffers
    }

    /// Captured buffers, in capture order
    pub fn captured(&self) -> &[IntermediateBuffer] {
        &self.buffers[..self.read.packets_success]
    }

    /// Unfilled tail of the arena, for the next batched read
    pub fn tail_mut(&mut self) -> &mut [IntermediateBuffer] {
        let start = self.read.packets_success;
        &mut self.buffers[start..]
    }

    /// Record that a read filled `count` buffers of the tail
    ///
    /// Counts beyond the remaining room are clamped.
    pub fn commit_read(&mut self, count: usize) -> usize {
        let count = count.min(self.remaining());
        self.read.packets_success += count;
        count
    }

    /// Write-to-stack batch
    pub fn write_to_stack(&self) -> &WriteRequest {
        &self.to_stack
    }

    /// Write-to-wire batch
    pub fn write_to_wire(&self) -> &WriteRequest {
        &self.to_wire
    }

    /// View of the write-to-stack batch for a driver call
    pub fn stack_batch(&self) -> BatchView<'_> {
        BatchView::new(&self.buffers, &self.to_stack.packets)
    }

    /// View of the write-to-wire batch for a driver call
    pub fn wire_batch(&self) -> BatchView<'_> {
        BatchView::new(&self.buffers, &self.to_wire.packets)
    }

    /// Reset the write-to-stack batch
    pub fn clear_stack_batch(&mut self) {
        self.to_stack.clear();
    }

    /// Reset the write-to-wire batch
    pub fn clear_wire_batch(&mut self) {
        self.to_wire.clear();
    }

    /// Whether the block is ready to re-enter capture
    pub fn is_idle(&self) -> bool {
        self.read.packets_success == 0 && self.to_stack.is_empty() && self.to_wire.is_empty()
    }

    /// Run every captured buffer through the classifiers and bucket it
    ///
    /// Batches are rebuilt from scratch in capture order. The read count is
    /// reset afterwards so the block can be captured into again once the
    /// batches are flushed.
    pub fn classify(&mut self, classifiers: &Classifiers) -> ClassifySummary {
        self.to_stack.clear();
        self.to_wire.clear();

        let adapter = self.read.adapter;
        let captured = self.read.packets_success;
        let mut summary = ClassifySummary {
            classified: captured,
            ..ClassifySummary::default()
        };

        for index in 0..captured {
            let buffer = &mut self.buffers[index];
            let direction = buffer.direction();
            let verdict = classifiers
                .for_direction(direction)
                .classify(adapter, direction, buffer);

            match (verdict, direction) {
                (Verdict::Drop, _) => summary.dropped += 1,
                (Verdict::Pass, Direction::Outbound) | (Verdict::Redirect, Direction::Inbound) => {
                    self.to_wire.push(index)
                }
                (Verdict::Pass, Direction::Inbound) | (Verdict::Redirect, Direction::Outbound) => {
                    self.to_stack.push(index)
                }
            }
            if verdict == Verdict::Redirect {
                summary.redirected += 1;
            }
        }

        summary.to_stack = self.to_stack.len();
        summary.to_wire = self.to_wire.len();
        self.read.packets_success = 0;
        summary
    }
}
