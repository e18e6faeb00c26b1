//! Rotate command - apply the retention policy.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use granary_catalog::{RotateOutcome, RotatePlan, RotateSummary};
use owo_colors::OwoColorize;

use super::human_bytes;
use crate::{Context, OutputFormat};

/// Arguments for the rotate command.
#[derive(Debug, Args)]
pub struct RotateArgs {
    /// Show what would be pruned without touching anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Execute the rotate command.
///
/// # Errors
///
/// Returns an error if the rotation cannot run, or if it completed but
/// some chains failed to prune.
pub async fn execute(args: RotateArgs, context: &Context) -> Result<()> {
    let orchestrator = context.settings.orchestrator();
    let summary = orchestrator.run_rotate(Utc::now(), args.dry_run).await?;

    match context.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Text => match &summary {
            RotateSummary::Planned(plan) => print_plan(plan),
            RotateSummary::Executed(outcome) => print_outcome(outcome),
        },
    }

    if let RotateSummary::Executed(outcome) = &summary {
        if outcome.has_errors() {
            anyhow::bail!(
                "rotation completed with {} errors (see output above)",
                outcome.errors.len()
            );
        }
    }
    Ok(())
}

fn print_plan(plan: &RotatePlan) {
    if plan.chains_to_prune.is_empty() {
        println!("Nothing to prune");
    } else {
        println!(
            "Would prune {} chains ({} entries, {}):",
            plan.chains_to_prune.len(),
            plan.entries_to_prune,
            human_bytes(plan.bytes_to_reclaim)
        );
        for anchor in &plan.chains_to_prune {
            println!("  {anchor}");
        }
    }
    println!("Retained: {} chains", plan.retained);
    if !plan.blocked_raw.is_empty() {
        println!();
        println!(
            "{} {} unprepared chains fell out of retention:",
            "warning:".yellow(),
            plan.blocked_raw.len()
        );
        for anchor in &plan.blocked_raw {
            println!("  {anchor} (prepare it, or prune it explicitly)");
        }
    }
}

fn print_outcome(outcome: &RotateOutcome) {
    println!(
        "Pruned {} chains ({} entries, {})",
        outcome.chains_pruned,
        outcome.entries_pruned,
        human_bytes(outcome.bytes_reclaimed)
    );
    println!("Swept {} leftover directories", outcome.dirs_swept);
    println!("Retained: {} chains", outcome.retained);
    for error in &outcome.errors {
        println!("{} {error}", "error:".red());
    }
}
