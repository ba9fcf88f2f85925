//! pktq CLI
//!
//! Command-line front end for the queued packet-filter pipeline.

mod args;
mod commands;
mod logging;
mod sim;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use args::Args;
use commands::Command;

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    logging::init(&args)?;

    if let Command::Run(ref run_args) = args.command {
        if !args.quiet && !run_args.json {
            print_banner();
        }
    }

    let result = run(args);

    if let Err(ref e) = result {
        error!("Fatal error: {:#}", e);
    }

    result
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Run(run_args) => commands::run::execute(run_args),
        Command::List(list_args) => commands::list::execute(list_args),
        Command::Config(config_args) => commands::config::execute(config_args),
        Command::Completions(comp_args) => commands::completions::execute(comp_args),
    }
}

fn print_banner() {
    use colored::Colorize;

    eprintln!();
    eprintln!("{}", "╔═══════════════════════════════════════════════════════╗".cyan());
    eprintln!(
        "{}{}{}",
        "║  ".cyan(),
        format!("pktq v{:<8}", env!("CARGO_PKG_VERSION")).green().bold(),
        "                                     ║".cyan()
    );
    eprintln!(
        "{}{}{}",
        "║  ".cyan(),
        "capture → classify → inject".white(),
        "                          ║".cyan()
    );
    eprintln!("{}", "╚═══════════════════════════════════════════════════════╝".cyan());
    eprintln!();
}
