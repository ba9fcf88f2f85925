//! List command - adapters visible to the filter

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use pktq_core::QueuedPacketFilter;
use serde::Serialize;

use crate::sim;

/// List command arguments
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Simulated Ethernet adapters
    #[arg(short, long, default_value_t = 2)]
    pub adapters: usize,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct InterfaceEntry {
    index: usize,
    name: String,
    friendly_name: String,
    mac: String,
    mtu: u16,
}

/// Execute list command
pub fn execute(args: ListArgs) -> Result<()> {
    let tap = sim::build_tap(args.adapters);
    let filter = QueuedPacketFilter::builder(tap)
        .build()
        .context("Failed to enumerate adapters")?;

    let entries: Vec<InterfaceEntry> = filter
        .interfaces()
        .iter()
        .enumerate()
        .map(|(index, adapter)| InterfaceEntry {
            index,
            name: adapter.info().name.clone(),
            friendly_name: adapter.friendly_name().to_string(),
            mac: adapter.info().mac_string(),
            mtu: adapter.mtu(),
        })
        .collect();

    if args.json {
        let json = serde_json::to_string_pretty(&entries).context("Failed to serialize adapters")?;
        println!("{json}");
        return Ok(());
    }

    println!("{}", " Adapters".bright_white().bold());
    println!();
    for entry in &entries {
        println!(
            "  {:>2}  {:<28} {}  mtu {}",
            entry.index.to_string().cyan(),
            entry.friendly_name,
            entry.mac.dimmed(),
            entry.mtu
        );
    }
    println!();
    println!("Total: {}", entries.len().to_string().green());

    Ok(())
}
