//! # granary-cli
//!
//! Command-line interface for the granary backup lifecycle manager.
//!
//! ## Commands
//!
//! - `granary backup` - Take the scheduled FULL or incremental backup
//! - `granary prepare` - Replay recovery logs so a chain is restorable
//! - `granary restore` - Copy a prepared chain into the data directory
//! - `granary rotate` - Apply the retention policy, pruning old chains
//! - `granary status` - Show chains, states, and retention labels
//!
//! ## Configuration
//!
//! Settings come from a TOML file, `/etc/granary/granary.toml` by
//! default:
//!
//! - `--config` / `GRANARY_CONFIG` - path to the settings file
//! - `--format` - `text` or `json` output
//! - `--verbose` - debug-level logging
//! - `--log-json` - structured JSON logs on stderr

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;
pub mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use granary_core::observability::LogFormat;

use crate::config::Settings;

/// Granary - MySQL physical backup lifecycle manager.
#[derive(Debug, Parser)]
#[command(name = "granary")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the settings file.
    #[arg(
        long,
        short = 'c',
        env = "GRANARY_CONFIG",
        default_value = "/etc/granary/granary.toml"
    )]
    pub config: PathBuf,

    /// Output format.
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,

    /// Enable debug-level logging.
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Emit logs as JSON instead of human-readable lines.
    #[arg(long)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Loads the settings file and bundles it with output preferences.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file cannot be read, parsed, or
    /// validated.
    pub fn context(&self) -> anyhow::Result<Context> {
        Ok(Context {
            settings: config::load(&self.config)?,
            format: self.format.clone(),
        })
    }

    /// Log output format chosen on the command line.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        if self.log_json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }

    /// Default log filter, honored when `RUST_LOG` is unset.
    #[must_use]
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "granary=debug,info"
        } else {
            "warn"
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Take the scheduled backup.
    Backup(commands::backup::BackupArgs),
    /// Prepare a chain for restore.
    Prepare(commands::prepare::PrepareArgs),
    /// Restore a prepared chain into the data directory.
    Restore(commands::restore::RestoreArgs),
    /// Apply the retention policy.
    Rotate(commands::rotate::RotateArgs),
    /// Show catalog status.
    Status(commands::status::StatusArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

/// Resolved runtime context for a command.
#[derive(Debug, Clone)]
pub struct Context {
    /// Settings loaded from the configuration file.
    pub settings: Settings,
    /// Output format.
    pub format: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "granary",
            "--config",
            "/tmp/granary.toml",
            "--format",
            "json",
            "--verbose",
            "backup",
            "--full",
        ]);

        assert_eq!(cli.config, PathBuf::from("/tmp/granary.toml"));
        assert!(matches!(cli.format, OutputFormat::Json));
        assert!(cli.verbose);
        assert_eq!(cli.log_filter(), "granary=debug,info");
        match cli.command {
            Commands::Backup(args) => assert!(args.full),
            _ => panic!("expected the backup subcommand"),
        }
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["granary", "status"]);
        assert_eq!(cli.config, PathBuf::from("/etc/granary/granary.toml"));
        assert!(matches!(cli.format, OutputFormat::Text));
        assert!(!cli.verbose);
        assert_eq!(cli.log_format(), LogFormat::Pretty);
        assert_eq!(cli.log_filter(), "warn");
    }

    #[test]
    fn test_cli_log_json_flag() {
        let cli = Cli::parse_from(["granary", "--log-json", "status"]);
        assert_eq!(cli.log_format(), LogFormat::Json);
    }
}
