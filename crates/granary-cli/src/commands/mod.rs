//! CLI subcommand implementations.

pub mod backup;
pub mod prepare;
pub mod restore;
pub mod rotate;
pub mod status;

use chrono::NaiveDate;
use granary_catalog::ChainTarget;
use granary_core::BackupId;

/// Resolves the chain a command targets from its `--date`/`--id` flags.
fn target_of(date: Option<NaiveDate>, id: Option<BackupId>) -> ChainTarget {
    match (date, id) {
        (Some(date), _) => ChainTarget::AnchorDate(date),
        (None, Some(id)) => ChainTarget::Anchor(id),
        (None, None) => ChainTarget::Latest,
    }
}

/// Formats a byte count for human eyes.
fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut whole = bytes;
    let mut rem = 0;
    let mut unit = 0;
    while whole >= 1024 && unit < UNITS.len() - 1 {
        rem = whole % 1024;
        whole /= 1024;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{whole}.{} {}", rem * 10 / 1024, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_resolution_prefers_date() {
        let date = "2024-01-08".parse::<NaiveDate>().unwrap();
        let id = "20240108T030000Z-full".parse::<BackupId>().unwrap();

        assert_eq!(target_of(None, None), ChainTarget::Latest);
        assert_eq!(target_of(Some(date), None), ChainTarget::AnchorDate(date));
        assert_eq!(target_of(None, Some(id)), ChainTarget::Anchor(id));
        assert_eq!(
            target_of(Some(date), Some(id)),
            ChainTarget::AnchorDate(date)
        );
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.0 MiB");
        assert_eq!(human_bytes(5_368_709_120), "5.0 GiB");
    }
}
