//! Command-line argument parsing

use crate::commands::Command;
use clap::{Parser, ValueEnum};

/// pktq - queued packet-filter pipeline
///
/// Runs the capture → classify → inject pipeline over a simulated tap and
/// manages its configuration.
#[derive(Parser, Debug)]
#[command(name = "pktq")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format for logs
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Log file path
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<String>,

    /// Run in quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text
    Text,
    /// JSON format
    Json,
    /// Compact format
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose() {
        let args = Args::parse_from(["pktq", "-v", "list"]);
        assert_eq!(args.verbose, 1);

        let args = Args::parse_from(["pktq", "list", "-vvv"]);
        assert_eq!(args.verbose, 3);
    }

    #[test]
    fn test_log_format() {
        let args = Args::parse_from(["pktq", "--log-format", "json", "list"]);
        assert_eq!(args.log_format, LogFormat::Json);
        assert!(!args.quiet);
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Args::try_parse_from(["pktq"]).is_err());
    }
}
