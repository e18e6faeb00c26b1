//! Status command - show chains, states, and retention labels.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use granary_catalog::{ChainState, StatusReport};
use owo_colors::OwoColorize;

use super::human_bytes;
use crate::{Context, OutputFormat};

/// Arguments for the status command.
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// List tombstoned entries as well.
    #[arg(long, short = 'a')]
    pub all: bool,
}

/// Execute the status command.
///
/// # Errors
///
/// Returns an error if the catalog cannot be loaded or fails
/// verification.
pub async fn execute(args: StatusArgs, context: &Context) -> Result<()> {
    let orchestrator = context.settings.orchestrator();
    let report = orchestrator.status(Utc::now()).await?;

    match context.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => print_report(&report, args.all),
    }
    Ok(())
}

fn print_report(report: &StatusReport, show_tombstones: bool) {
    use tabled::{Table, Tabled};

    #[derive(Tabled)]
    struct ChainRow {
        #[tabled(rename = "Anchor")]
        anchor: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "Entries")]
        entries: u64,
        #[tabled(rename = "Size")]
        size: String,
        #[tabled(rename = "Bucket")]
        bucket: String,
        #[tabled(rename = "Created")]
        created: String,
    }

    if report.chains.is_empty() {
        println!("No chains yet");
    } else {
        let rows: Vec<_> = report
            .chains
            .iter()
            .map(|chain| ChainRow {
                anchor: chain.anchor.to_string(),
                state: format_state_colored(chain.state),
                entries: chain.entries,
                size: human_bytes(chain.total_bytes),
                bucket: chain
                    .bucket
                    .as_ref()
                    .map_or_else(String::new, |b| format!("{} {}", b.kind, b.slot)),
                created: chain.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            })
            .collect();
        println!("{}", Table::new(rows));
    }

    if !report.orphans.is_empty() {
        println!();
        println!(
            "{} {} orphaned increments:",
            "warning:".yellow(),
            report.orphans.len()
        );
        for orphan in &report.orphans {
            println!("  {} (base {})", orphan.id, orphan.base_id);
        }
    }

    println!();
    if !report.tombstoned.is_empty() {
        println!("Tombstones: {}", report.tombstoned.len());
        if show_tombstones {
            for id in &report.tombstoned {
                println!("  {id}");
            }
        }
    }
    println!("Next scheduled backup: {}", report.next_backup);
}

fn format_state_colored(state: ChainState) -> String {
    match state {
        ChainState::Prepared => state.to_string().green().to_string(),
        ChainState::Raw => state.to_string().yellow().to_string(),
        ChainState::Corrupt => state.to_string().red().to_string(),
    }
}
