//! Prepare command - replay recovery logs so a chain is restorable.

use anyhow::Result;
use chrono::NaiveDate;
use clap::Args;
use granary_core::BackupId;

use super::target_of;
use crate::{Context, OutputFormat};

/// Arguments for the prepare command.
#[derive(Debug, Args)]
pub struct PrepareArgs {
    /// Anchor date of the chain to prepare (defaults to the latest).
    #[arg(long, short = 'd', value_name = "YYYY-MM-DD", conflicts_with = "id")]
    pub date: Option<NaiveDate>,

    /// Exact anchor identifier of the chain to prepare.
    #[arg(long, value_name = "ID")]
    pub id: Option<BackupId>,
}

/// Execute the prepare command.
///
/// # Errors
///
/// Returns an error if the chain cannot be found or a prepare step
/// fails; an interrupted run can simply be repeated.
pub async fn execute(args: PrepareArgs, context: &Context) -> Result<()> {
    let orchestrator = context.settings.orchestrator();
    let target = target_of(args.date, args.id);
    let report = orchestrator.run_prepare(&target).await?;

    match context.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            if report.steps_run == 0 {
                println!("Chain {} is already prepared", report.anchor);
            } else {
                println!(
                    "Chain {} prepared ({} steps)",
                    report.anchor, report.steps_run
                );
            }
            println!("Restore source: {}", report.target_dir.display());
        }
    }
    Ok(())
}
