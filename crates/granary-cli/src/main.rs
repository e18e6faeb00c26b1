//! Granary CLI - backup lifecycle management from the command line.
//!
//! The main entry point for the `granary` binary.

use anyhow::Result;
use clap::Parser;
use granary_core::observability::init_logging;

use granary_cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_format(), cli.log_filter());

    let context = cli.context()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Backup(args) => granary_cli::commands::backup::execute(args, &context).await,
            Commands::Prepare(args) => {
                granary_cli::commands::prepare::execute(args, &context).await
            }
            Commands::Restore(args) => {
                granary_cli::commands::restore::execute(args, &context).await
            }
            Commands::Rotate(args) => granary_cli::commands::rotate::execute(args, &context).await,
            Commands::Status(args) => granary_cli::commands::status::execute(args, &context).await,
        }
    })
}
