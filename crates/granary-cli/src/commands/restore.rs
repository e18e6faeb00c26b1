//! Restore command - copy a prepared chain into the data directory.

use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::Args;
use granary_core::BackupId;

use super::target_of;
use crate::{Context, OutputFormat};

/// Arguments for the restore command.
#[derive(Debug, Args)]
pub struct RestoreArgs {
    /// Anchor date of the chain to restore (defaults to the latest).
    #[arg(long, short = 'd', value_name = "YYYY-MM-DD", conflicts_with = "id")]
    pub date: Option<NaiveDate>,

    /// Exact anchor identifier of the chain to restore.
    #[arg(long, value_name = "ID")]
    pub id: Option<BackupId>,

    /// Restore into this directory instead of the configured data_dir.
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

/// Execute the restore command.
///
/// # Errors
///
/// Returns an error if the chain is not fully prepared, the data
/// directory is not empty, or the copy-back fails.
pub async fn execute(args: RestoreArgs, context: &Context) -> Result<()> {
    let mut settings = context.settings.clone();
    if let Some(dir) = args.data_dir {
        settings.cluster.data_dir = dir;
    }
    let orchestrator = settings.orchestrator();
    let target = target_of(args.date, args.id);
    let report = orchestrator.run_restore(&target).await?;

    match context.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("Restored chain {}", report.anchor);
            println!("From: {}", report.source_dir.display());
            println!("Into: {}", report.data_dir.display());
            println!();
            println!("Fix ownership before starting the server, e.g.");
            println!("  chown -R mysql:mysql {}", report.data_dir.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_args_parsing() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            args: RestoreArgs,
        }

        let cli = TestCli::parse_from(["test", "--data-dir", "/srv/restore"]);
        assert_eq!(cli.args.data_dir, Some(PathBuf::from("/srv/restore")));
        assert!(cli.args.date.is_none());
        assert!(cli.args.id.is_none());
    }
}
