//! Stage workers
//!
//! Each stage runs on its own thread for the lifetime of a session, takes
//! blocks from its input queue, does its one job, and passes the block on.
//! The only blocking points are the input dequeue and, for capture, the
//! adapter event wait; both also wake on cancellation.

use super::block::PacketBlock;
use super::cancel::CancelToken;
use super::stats::{Destination, PipelineStats};
use crate::adapter::NetworkAdapter;
use crate::classify::Classifiers;
use crate::driver::TapDriver;
use crossbeam_channel::{select, Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Waits for packets and reads them into blocks
    Capture,
    /// Runs classifiers and builds the write batches
    Classify,
    /// Flushes the write-to-stack batch
    StackInjection,
    /// Flushes the write-to-wire batch
    WireInjection,
}

impl Stage {
    /// Short name used for thread names and logs
    pub fn name(self) -> &'static str {
        match self {
            Stage::Capture => "capture",
            Stage::Classify => "classify",
            Stage::StackInjection => "stack",
            Stage::WireInjection => "wire",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a stage worker needs for one session
pub(crate) struct StageContext {
    pub(crate) driver: Arc<dyn TapDriver>,
    pub(crate) adapter: Arc<NetworkAdapter>,
    pub(crate) classifiers: Classifiers,
    pub(crate) stats: Arc<PipelineStats>,
    pub(crate) held: Arc<AtomicUsize>,
    pub(crate) cancel: CancelToken,
    pub(crate) poll_interval: Duration,
}

impl StageContext {
    /// Take the next block, or `None` once cancelled
    fn take(&self, input: &Receiver<PacketBlock>) -> Option<PacketBlock> {
        if self.cancel.is_cancelled() {
            return None;
        }
        select! {
            recv(input) -> block => {
                let block = block.ok()?;
                self.held.fetch_add(1, Ordering::SeqCst);
                Some(block)
            }
            recv(self.cancel.wake()) -> _ => None,
        }
    }

    /// Hand a block to the next stage
    ///
    /// Queues are as large as the pool, so this never waits. A worker that
    /// is being cancelled still hands its block on so none go missing.
    fn forward(&self, output: &Sender<PacketBlock>, block: PacketBlock) {
        if output.send(block).is_err() {
            debug!("Output queue closed, dropping block");
        }
        self.held.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Run `stage` until the session is cancelled
pub(crate) fn run_stage(
    stage: Stage,
    ctx: &StageContext,
    input: &Receiver<PacketBlock>,
    output: &Sender<PacketBlock>,
) {
    debug!(%stage, adapter = %ctx.adapter.friendly_name(), "Stage worker started");
    match stage {
        Stage::Capture => run_capture(ctx, input, output),
        Stage::Classify => run_classify(ctx, input, output),
        Stage::StackInjection => run_injection(ctx, Destination::Stack, input, output),
        Stage::WireInjection => run_injection(ctx, Destination::Wire, input, output),
    }
    debug!(%stage, "Stage worker exited");
}

fn run_capture(ctx: &StageContext, input: &Receiver<PacketBlock>, output: &Sender<PacketBlock>) {
    while let Some(mut block) = ctx.take(input) {
        debug_assert!(
            block.write_to_stack().is_empty() && block.write_to_wire().is_empty(),
            "block re-entered capture with pending batches"
        );

        while block.packets_success() == 0 {
            if !wait_for_packets(ctx) {
                break;
            }
            if let Err(e) = ctx.adapter.reset_event(ctx.driver.as_ref()) {
                warn!(error = %e, "Failed to reset packet event");
            }
            drain_into(ctx, &mut block);
        }

        let captured = block.packets_success();
        if captured > 0 {
            ctx.stats.record_capture(captured);
            debug!(packets = captured, "Captured block");
        }
        ctx.forward(output, block);
    }
}

/// Block until the adapter signals packets. Returns `false` once cancelled.
fn wait_for_packets(ctx: &StageContext) -> bool {
    loop {
        if ctx.cancel.is_cancelled() {
            return false;
        }
        match ctx
            .adapter
            .wait_event(ctx.driver.as_ref(), Some(ctx.poll_interval))
        {
            Ok(true) => return true,
            Ok(false) => continue,
            Err(e) => {
                warn!(error = %e, "Packet event wait failed");
                if ctx.cancel.sleep(ctx.poll_interval) {
                    return false;
                }
            }
        }
    }
}

/// Read until the driver has nothing more or the block is full
fn drain_into(ctx: &StageContext, block: &mut PacketBlock) {
    let adapter = block.adapter();
    while !block.is_full() && !ctx.cancel.is_cancelled() {
        match ctx.driver.read_batch(adapter, block.tail_mut()) {
            Ok(0) => break,
            Ok(read) => {
                block.commit_read(read);
            }
            Err(e) => {
                ctx.stats.record_read_failure();
                warn!(error = %e, "Batched read failed");
                break;
            }
        }
    }
}

fn run_classify(ctx: &StageContext, input: &Receiver<PacketBlock>, output: &Sender<PacketBlock>) {
    while let Some(mut block) = ctx.take(input) {
        let summary = block.classify(&ctx.classifiers);
        ctx.stats.record_classify(&summary);
        trace!(
            classified = summary.classified,
            to_stack = summary.to_stack,
            to_wire = summary.to_wire,
            dropped = summary.dropped,
            "Classified block"
        );
        ctx.forward(output, block);
    }
}

fn run_injection(
    ctx: &StageContext,
    destination: Destination,
    input: &Receiver<PacketBlock>,
    output: &Sender<PacketBlock>,
) {
    while let Some(mut block) = ctx.take(input) {
        flush(ctx, destination, &mut block);
        ctx.forward(output, block);
    }
}

/// Send one batch. Failed batches are not retried; the batch is cleared
/// either way.
fn flush(ctx: &StageContext, destination: Destination, block: &mut PacketBlock) {
    let batch = match destination {
        Destination::Stack => block.write_to_stack(),
        Destination::Wire => block.write_to_wire(),
    };
    let pending = batch.len();

    if pending > 0 {
        let adapter = batch.adapter();
        let result = match destination {
            Destination::Stack => {
                ctx.driver
                    .send_batch_to_stack(adapter, block.buffers(), batch.packets())
            }
            Destination::Wire => {
                ctx.driver
                    .send_batch_to_wire(adapter, block.buffers(), batch.packets())
            }
        };

        match result {
            Ok(accepted) if accepted >= pending => {
                ctx.stats.record_sent(destination, pending);
            }
            Ok(accepted) => {
                ctx.stats.record_sent(destination, accepted);
                ctx.stats.record_send_failure(destination, pending - accepted);
                warn!(
                    destination = destination.as_str(),
                    pending, accepted, "Batch partially sent"
                );
            }
            Err(e) => {
                ctx.stats.record_send_failure(destination, pending);
                warn!(
                    destination = destination.as_str(),
                    pending,
                    error = %e,
                    "Batch send failed"
                );
            }
        }
    }

    match destination {
        Destination::Stack => block.clear_stack_batch(),
        Destination::Wire => block.clear_wire_batch(),
    }
}
