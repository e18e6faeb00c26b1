//! Backup command - take the scheduled FULL or incremental backup.

use anyhow::Result;
use chrono::Utc;
use clap::Args;

use super::human_bytes;
use crate::{Context, OutputFormat};

/// Arguments for the backup command.
#[derive(Debug, Args)]
pub struct BackupArgs {
    /// Take a FULL backup even if the week already has an anchor.
    #[arg(long)]
    pub full: bool,
}

/// Execute the backup command.
///
/// # Errors
///
/// Returns an error if the cluster lock cannot be acquired, the catalog
/// fails verification, or the backup tool fails.
pub async fn execute(args: BackupArgs, context: &Context) -> Result<()> {
    let orchestrator = context.settings.orchestrator();
    let report = orchestrator.run_backup(Utc::now(), args.full).await?;

    match context.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("Backup complete: {}", report.id);
            println!("Kind:     {}", report.kind);
            if let Some(base) = report.base_id {
                println!("Base:     {base}");
            }
            println!("Artifact: {}", report.artifact_path.display());
            println!("Size:     {}", human_bytes(report.size_bytes));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_args_parsing() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            args: BackupArgs,
        }

        let cli = TestCli::parse_from(["test", "--full"]);
        assert!(cli.args.full);

        let cli = TestCli::parse_from(["test"]);
        assert!(!cli.args.full);
    }
}
