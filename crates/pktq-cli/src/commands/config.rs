//! Config command - filter configuration management

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use pktq_core::FilterConfig;
use std::path::PathBuf;
use tracing::info;

use crate::sim::SimulationConfig;

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show a configuration, or the defaults
    Show {
        /// Config file to show
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "pktq.toml")]
        output: PathBuf,

        /// Generate a full simulation config instead of filter settings only
        #[arg(long)]
        simulation: bool,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Config file to validate
        file: PathBuf,
    },
}

/// Execute config command
pub fn execute(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show { file } => show_config(file),
        ConfigAction::Generate {
            output,
            simulation,
            force,
        } => generate_config(output, simulation, force),
        ConfigAction::Validate { file } => validate_config(file),
    }
}

fn show_config(file: Option<PathBuf>) -> Result<()> {
    let config = match file {
        Some(path) => FilterConfig::load(&path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => FilterConfig::default(),
    };

    let toml_str = config.to_toml().context("Failed to serialize config")?;
    println!("{}", toml_str);
    Ok(())
}

fn generate_config(output: PathBuf, simulation: bool, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", output.display());
    }

    let (kind, body) = if simulation {
        let toml_str = toml::to_string_pretty(&SimulationConfig::default())
            .context("Failed to serialize simulation config")?;
        ("simulation", toml_str)
    } else {
        let toml_str = FilterConfig::default()
            .to_toml()
            .context("Failed to serialize config")?;
        ("filter", toml_str)
    };

    let content = format!("# pktq {kind} configuration\n\n{body}");

    std::fs::write(&output, content)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    info!(path = %output.display(), kind, "Generated config file");
    println!("Configuration file generated: {}", output.display());
    Ok(())
}

fn validate_config(file: PathBuf) -> Result<()> {
    let config = FilterConfig::load(&file)
        .with_context(|| format!("Failed to load config from {:?}", file))?;

    config.validate().context("Configuration validation failed")?;

    println!("✓ Configuration is valid");
    println!("  Pool size: {}", config.pool_size);
    println!("  Packets per block: {}", config.packets_per_block);
    println!("  Buffers: {}", config.buffer_count());
    println!("  Event poll interval: {:?}", config.event_poll_interval());

    Ok(())
}
