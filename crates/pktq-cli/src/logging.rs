//! Logging initialization

use anyhow::{Context, Result};
use std::fs::File;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::args::{Args, LogFormat};

/// Initialize logging based on CLI arguments
pub fn init(args: &Args) -> Result<()> {
    let level = if args.quiet {
        Level::ERROR
    } else {
        match args.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    // RUST_LOG overrides the level picked from the flags
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let log_file = match args.log_file {
        Some(ref path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create log file: {path}"))?;
            Some(Mutex::new(file))
        }
        None => None,
    };

    match args.log_format {
        LogFormat::Text => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(args.verbose >= 2)
                    .with_thread_names(args.verbose >= 2)
                    .with_file(args.verbose >= 3)
                    .with_line_number(args.verbose >= 3),
            );

            match log_file {
                Some(file) => subscriber
                    .with(fmt::layer().with_ansi(false).with_writer(file))
                    .init(),
                None => subscriber.init(),
            }
        }
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr));

            match log_file {
                Some(file) => subscriber
                    .with(fmt::layer().json().with_writer(file))
                    .init(),
                None => subscriber.init(),
            }
        }
        LogFormat::Compact => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr));

            match log_file {
                Some(file) => subscriber
                    .with(fmt::layer().compact().with_ansi(false).with_writer(file))
                    .init(),
                None => subscriber.init(),
            }
        }
    }

    Ok(())
}
