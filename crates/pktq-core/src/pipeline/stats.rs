//! Pipeline counters
//!
//! Failed batches are never retried; the counters here are the only place
//! such losses show up.

use super::block::ClassifySummary;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the stage workers
#[derive(Debug, Default)]
pub struct PipelineStats {
    blocks_captured: AtomicU64,
    packets_captured: AtomicU64,
    packets_to_stack: AtomicU64,
    packets_to_wire: AtomicU64,
    packets_dropped: AtomicU64,
    packets_redirected: AtomicU64,
    read_failures: AtomicU64,
    stack_send_failures: AtomicU64,
    wire_send_failures: AtomicU64,
    packets_lost: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Blocks handed from capture to classify
    pub blocks_captured: u64,
    /// Packets read from the driver
    pub packets_captured: u64,
    /// Packets accepted by the stack
    pub packets_to_stack: u64,
    /// Packets accepted by the wire
    pub packets_to_wire: u64,
    /// Packets dropped by a classifier
    pub packets_dropped: u64,
    /// Packets redirected by a classifier
    pub packets_redirected: u64,
    /// Failed batched reads
    pub read_failures: u64,
    /// Failed or partial stack batches
    pub stack_send_failures: u64,
    /// Failed or partial wire batches
    pub wire_send_failures: u64,
    /// Packets lost in failed or partial batches
    pub packets_lost: u64,
}

/// Which injection path a batch went through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Destination {
    Stack,
    Wire,
}

impl Destination {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Destination::Stack => "stack",
            Destination::Wire => "wire",
        }
    }
}

impl PipelineStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_capture(&self, packets: usize) {
        self.blocks_captured.fetch_add(1, Ordering::Relaxed);
        self.packets_captured.fetch_add(packets as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_read_failure(&self) {
        self.read_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_classify(&self, summary: &ClassifySummary) {
        self.packets_dropped
            .fetch_add(summary.dropped as u64, Ordering::Relaxed);
        self.packets_redirected
            .fetch_add(summary.redirected as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, destination: Destination, accepted: usize) {
        let counter = match destination {
            Destination::Stack => &self.packets_to_stack,
            Destination::Wire => &self.packets_to_wire,
        };
        counter.fetch_add(accepted as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self, destination: Destination, lost: usize) {
        let counter = match destination {
            Destination::Stack => &self.stack_send_failures,
            Destination::Wire => &self.wire_send_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.packets_lost.fetch_add(lost as u64, Ordering::Relaxed);
    }

    /// Copy the current values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks_captured: self.blocks_captured.load(Ordering::Relaxed),
            packets_captured: self.packets_captured.load(Ordering::Relaxed),
            packets_to_stack: self.packets_to_stack.load(Ordering::Relaxed),
            packets_to_wire: self.packets_to_wire.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            packets_redirected: self.packets_redirected.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            stack_send_failures: self.stack_send_failures.load(Ordering::Relaxed),
            wire_send_failures: self.wire_send_failures.load(Ordering::Relaxed),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.blocks_captured,
            &self.packets_captured,
            &self.packets_to_stack,
            &self.packets_to_wire,
            &self.packets_dropped,
            &self.packets_redirected,
            &self.read_failures,
            &self.stack_send_failures,
            &self.wire_send_failures,
            &self.packets_lost,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl StatsSnapshot {
    /// Packets that left the pipeline through either injection path
    pub fn packets_injected(&self) -> u64 {
        self.packets_to_stack + self.packets_to_wire
    }
}
