//! Run command - drive the filter with simulated traffic

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use pktq_core::{PoolCensus, QueuedPacketFilter, StatsSnapshot};
use pktq_platform::{MemoryTap, Sink};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::sim::{self, SimulationConfig, Traffic, VerdictPolicy};

const SETTLE_POLL: Duration = Duration::from_millis(10);
const BACKLOG_POLL: Duration = Duration::from_millis(1);

/// Pool capacities of unread frames the generator may run ahead by
const BACKLOG_POOLS: usize = 4;

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Simulation config file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Index of the adapter to filter
    #[arg(short = 'a', long)]
    pub adapter: Option<usize>,

    /// Simulated Ethernet adapters
    #[arg(long)]
    pub adapters: Option<usize>,

    /// Frames to inject
    #[arg(short = 'n', long)]
    pub packets: Option<u64>,

    /// Frames injected between yields
    #[arg(long)]
    pub burst: Option<usize>,

    /// Verdict policy for received frames
    #[arg(long, value_enum)]
    pub inbound: Option<VerdictPolicy>,

    /// Verdict policy for sent frames
    #[arg(long, value_enum)]
    pub outbound: Option<VerdictPolicy>,

    /// Packet blocks in the pool
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Packets per block
    #[arg(long)]
    pub packets_per_block: Option<usize>,

    /// RNG seed for reproducible traffic
    #[arg(long)]
    pub seed: Option<u64>,

    /// Seconds to wait for the pipeline to drain
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Outcome of a simulation run
#[derive(Debug, Serialize)]
struct RunReport {
    adapter: String,
    packets_injected: u64,
    elapsed_ms: u128,
    delivered_to_stack: usize,
    delivered_to_wire: usize,
    packets_forwarded: u64,
    bypassed: usize,
    overflowed: usize,
    blocks_reclaimed: usize,
    completed: bool,
    stats: StatsSnapshot,
    pool: PoolCensus,
}

/// Execute the run command
pub fn execute(args: RunArgs) -> Result<()> {
    let sim = load_config(&args)?;
    sim.validate().context("Invalid simulation settings")?;
    info!(
        packets = sim.packets,
        pool_size = sim.filter.pool_size,
        packets_per_block = sim.filter.packets_per_block,
        inbound = ?sim.inbound,
        outbound = ?sim.outbound,
        "Loaded simulation settings"
    );

    let tap = sim::build_tap(sim.adapters);
    let filter = build_filter(&tap, &sim)?;

    let adapter = filter
        .interfaces()
        .get(sim.adapter_index)
        .cloned()
        .with_context(|| format!("No adapter at index {}", sim.adapter_index))?;

    filter
        .start(sim.adapter_index)
        .with_context(|| format!("Failed to start filter on {}", adapter.friendly_name()))?;

    // Set up signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    // Frames past the backlog are refused by the tap and show up as overflow
    let backlog = sim.filter.buffer_count() * BACKLOG_POOLS;
    tap.set_queue_limit(Some(backlog));

    let started = Instant::now();
    let deadline = started + Duration::from_secs(sim.timeout_secs);
    let mut traffic = Traffic::new(&sim, adapter.info().mac);
    let mut injected = 0u64;

    while running.load(Ordering::SeqCst) && injected < sim.packets && Instant::now() < deadline {
        let room = backlog.saturating_sub(tap.pending(adapter.handle()));
        if room == 0 {
            thread::sleep(BACKLOG_POLL);
            continue;
        }
        let burst = (sim.packets - injected).min(sim.burst.min(room) as u64);
        for _ in 0..burst {
            let (direction, frame) = traffic.next_frame();
            tap.inject(adapter.handle(), direction, frame)
                .context("Failed to inject simulated frame")?;
        }
        injected += burst;
        thread::yield_now();
    }
    debug!(injected, "Traffic generation finished");

    let mut completed = settled(&tap, &filter) >= injected;
    while !completed && running.load(Ordering::SeqCst) && Instant::now() < deadline {
        thread::sleep(SETTLE_POLL);
        completed = settled(&tap, &filter) >= injected;
    }
    if !completed {
        warn!(
            injected,
            settled = settled(&tap, &filter),
            "Pipeline did not drain before shutdown"
        );
    }

    filter.stop().context("Failed to stop filter")?;
    filter.join();
    let pool = filter.pool_census();
    let blocks_reclaimed = filter.release().context("Failed to release filter")?;

    let stats = filter.stats();
    let report = RunReport {
        adapter: adapter.friendly_name().to_string(),
        packets_injected: injected,
        elapsed_ms: started.elapsed().as_millis(),
        delivered_to_stack: tap.delivered(Sink::Stack),
        delivered_to_wire: tap.delivered(Sink::Wire),
        packets_forwarded: stats.packets_injected(),
        bypassed: tap.bypassed(Sink::Stack) + tap.bypassed(Sink::Wire),
        overflowed: tap.overflowed(),
        blocks_reclaimed,
        completed,
        stats,
        pool,
    };

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{json}");
    } else {
        print_report(&report);
    }

    info!("Simulation finished");
    Ok(())
}

fn load_config(args: &RunArgs) -> Result<SimulationConfig> {
    // Priority: flags > config file > defaults
    let mut config = match args.config {
        Some(ref path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };

    if let Some(index) = args.adapter {
        config.adapter_index = index;
    }
    if let Some(count) = args.adapters {
        config.adapters = count;
    }
    if let Some(packets) = args.packets {
        config.packets = packets;
    }
    if let Some(burst) = args.burst {
        config.burst = burst;
    }
    if let Some(policy) = args.inbound {
        config.inbound = policy;
    }
    if let Some(policy) = args.outbound {
        config.outbound = policy;
    }
    if let Some(pool_size) = args.pool_size {
        config.filter.pool_size = pool_size;
    }
    if let Some(packets_per_block) = args.packets_per_block {
        config.filter.packets_per_block = packets_per_block;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }

    Ok(config)
}

fn build_filter(tap: &Arc<MemoryTap>, sim: &SimulationConfig) -> Result<QueuedPacketFilter> {
    let mut builder = QueuedPacketFilter::builder(tap.clone()).config(sim.filter.clone());
    if let Some(classifier) = sim.inbound.classifier() {
        builder = builder.inbound(classifier);
    }
    if let Some(classifier) = sim.outbound.classifier() {
        builder = builder.outbound(classifier);
    }
    builder.build().context("Failed to initialize filter")
}

/// Frames that reached a final destination or were accounted as gone
fn settled(tap: &MemoryTap, filter: &QueuedPacketFilter) -> u64 {
    let stats = filter.stats();
    (tap.delivered(Sink::Stack) + tap.delivered(Sink::Wire)) as u64
        + stats.packets_dropped
        + stats.packets_lost
        + tap.overflowed() as u64
}

fn print_report(report: &RunReport) {
    let stats = &report.stats;
    let status = if report.completed {
        "complete".green()
    } else {
        "incomplete".yellow()
    };

    println!("{}", " Simulation Report".bright_white().bold());
    println!();
    println!("Adapter: {}", report.adapter.cyan());
    println!("Status: {}  ({} ms)", status, report.elapsed_ms);
    println!();
    println!("  Injected          {}", report.packets_injected);
    println!("  Captured          {}", stats.packets_captured);
    println!("  Blocks            {}", stats.blocks_captured);
    println!("  To stack          {}", report.delivered_to_stack.to_string().green());
    println!("  To wire           {}", report.delivered_to_wire.to_string().green());
    println!("  Forwarded         {}", report.packets_forwarded);
    println!("  Redirected        {}", stats.packets_redirected);
    println!("  Dropped           {}", stats.packets_dropped.to_string().yellow());
    println!("  Bypassed filter   {}", report.bypassed);
    if report.overflowed > 0 {
        println!("  Tap overflow      {}", report.overflowed.to_string().red());
    }
    if stats.packets_lost > 0 || stats.read_failures > 0 {
        println!("  Lost              {}", stats.packets_lost.to_string().red());
        println!("  Read failures     {}", stats.read_failures.to_string().red());
    }
    println!();
    println!(
        "Pool: {} blocks reclaimed ({} held at shutdown)",
        report.blocks_reclaimed, report.pool.held
    );
}
