//! Backup kind scheduling.
//!
//! One FULL backup anchors each scheduling week; every later backup in
//! the same week chains onto it as an increment. The week boundary
//! follows the retention policy's `week_start`, so scheduling and the
//! WEEKLY retention bucket agree on what a week is.

use std::path::PathBuf;

use chrono::{DateTime, NaiveTime, Utc};
use granary_core::{BackupId, BackupKind};

use crate::chain::{ChainSet, ChainState};
use crate::rotation::{week_start_of, RotationPolicy};

/// What kind of backup to take next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Take a FULL backup, anchoring a new chain.
    Full,

    /// Take an INCREMENTAL against the latest chain's anchor.
    Incremental {
        /// The anchor to chain onto.
        base_id: BackupId,

        /// The anchor's artifact directory, for the tool invocation.
        base_path: PathBuf,
    },
}

impl Decision {
    /// Returns the backup kind this decision produces.
    #[must_use]
    pub fn kind(&self) -> BackupKind {
        match self {
            Self::Full => BackupKind::Full,
            Self::Incremental { .. } => BackupKind::Incremental,
        }
    }
}

/// Decides what kind of backup to take at `now`.
///
/// FULL when there is no chain yet, when the latest chain is CORRUPT
/// (never extend a chain that cannot be prepared), or when the latest
/// anchor predates the current scheduling week. Otherwise INCREMENTAL
/// against the latest anchor. An anchor taken exactly at the week
/// boundary belongs to the week it opens.
#[must_use]
pub fn decide(now: DateTime<Utc>, chains: &ChainSet, policy: &RotationPolicy) -> Decision {
    let Some(latest) = chains.latest() else {
        tracing::debug!(decision = "full", reason = "no existing chain", "backup scheduled");
        return Decision::Full;
    };

    if latest.state() == ChainState::Corrupt {
        tracing::debug!(
            decision = "full",
            anchor = %latest.id(),
            reason = "latest chain corrupt",
            "backup scheduled"
        );
        return Decision::Full;
    }

    let boundary = week_start_of(now.date_naive(), policy.week_start)
        .and_time(NaiveTime::MIN)
        .and_utc();

    if latest.anchor().created_at < boundary {
        tracing::debug!(
            decision = "full",
            anchor = %latest.id(),
            reason = "anchor predates current week",
            "backup scheduled"
        );
        Decision::Full
    } else {
        tracing::debug!(
            decision = "incremental",
            anchor = %latest.id(),
            "backup scheduled"
        );
        Decision::Incremental {
            base_id: latest.id(),
            base_path: latest.anchor().storage_path.clone(),
        }
    }
}
