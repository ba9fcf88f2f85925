//! CLI commands

pub mod completions;
pub mod config;
pub mod list;
pub mod run;

use clap::Subcommand;

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the filter over simulated traffic
    Run(run::RunArgs),

    /// List the adapters the filter can attach to
    List(list::ListArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}
