//! Retention bucket classification.
//!
//! Each chain is assigned to at most one calendar slot: the first chain
//! anchored in a slot represents it, higher buckets claim before lower
//! ones, and only slots within a bucket's configured window count. A
//! chain no slot claims is the rotation engine's prey, provided its
//! state permits pruning.
//!
//! Classification is a pure function of the chain set, the policy, and
//! the evaluation instant, so repeated rotations over an unchanged
//! catalog decide identically.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use granary_core::BackupId;
use serde::Serialize;

use crate::chain::{Chain, ChainSet, ChainState};
use crate::rotation::policy::RotationPolicy;

/// Retention buckets, in ascending precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BucketKind {
    /// One chain per calendar day.
    Daily,

    /// One chain per scheduling week.
    Weekly,

    /// One chain per calendar month.
    Monthly,

    /// One chain per yearly window.
    Yearly,
}

impl BucketKind {
    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for BucketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "DAILY"),
            Self::Weekly => write!(f, "WEEKLY"),
            Self::Monthly => write!(f, "MONTHLY"),
            Self::Yearly => write!(f, "YEARLY"),
        }
    }
}

/// A retention slot assignment for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionBucket {
    /// The bucket that claimed the chain.
    pub kind: BucketKind,

    /// The calendar slot, e.g. `2024-03` for a monthly slot.
    pub slot: String,

    /// The claimed chain's anchor.
    pub anchor: BackupId,
}

/// Returns the date of the most recent `week_start` on or before `date`.
#[must_use]
pub fn week_start_of(date: NaiveDate, week_start: Weekday) -> NaiveDate {
    let offset =
        (date.weekday().num_days_from_monday() + 7 - week_start.num_days_from_monday()) % 7;
    date - chrono::Duration::days(i64::from(offset))
}

/// The yearly window rollover date within `year`.
fn anchor_date_for_year(year: i32, yearly_anchor_day: u16) -> NaiveDate {
    NaiveDate::from_yo_opt(year, u32::from(yearly_anchor_day))
        .or_else(|| NaiveDate::from_yo_opt(year, 365))
        .unwrap_or_default()
}

/// The yearly window `date` falls into, named after the year that
/// window's rollover date lies in.
fn retention_year(date: NaiveDate, yearly_anchor_day: u16) -> i32 {
    let year = date.year();
    if date < anchor_date_for_year(year, yearly_anchor_day) {
        year - 1
    } else {
        year
    }
}

fn slot_key(kind: BucketKind, date: NaiveDate, policy: &RotationPolicy) -> String {
    match kind {
        BucketKind::Daily => date.format("%Y-%m-%d").to_string(),
        BucketKind::Weekly => week_start_of(date, policy.week_start)
            .format("%Y-%m-%d")
            .to_string(),
        BucketKind::Monthly => date.format("%Y-%m").to_string(),
        BucketKind::Yearly => retention_year(date, policy.yearly_anchor_day).to_string(),
    }
}

/// How many slots back from `now` the date's slot lies. Zero is the
/// current slot; future-dated slots come out negative and still count
/// as within any window.
fn slot_index(kind: BucketKind, date: NaiveDate, now: NaiveDate, policy: &RotationPolicy) -> i64 {
    match kind {
        BucketKind::Daily => now.signed_duration_since(date).num_days(),
        BucketKind::Weekly => {
            let span = week_start_of(now, policy.week_start)
                .signed_duration_since(week_start_of(date, policy.week_start));
            span.num_days() / 7
        }
        BucketKind::Monthly => {
            let months = |d: NaiveDate| i64::from(d.year()) * 12 + i64::from(d.month0());
            months(now) - months(date)
        }
        BucketKind::Yearly => i64::from(retention_year(now, policy.yearly_anchor_day))
            - i64::from(retention_year(date, policy.yearly_anchor_day)),
    }
}

const fn count_for(kind: BucketKind, policy: &RotationPolicy) -> u32 {
    match kind {
        BucketKind::Daily => policy.daily_count,
        BucketKind::Weekly => policy.weekly_count,
        BucketKind::Monthly => policy.monthly_count,
        BucketKind::Yearly => policy.yearly_count,
    }
}

/// Assigns each chain its retention label, if any bucket claims it.
///
/// Buckets are walked highest-precedence first. Within one slot the
/// earliest anchor is the slot's representative, even when a higher
/// bucket already claimed it; a slot never passes its claim down to a
/// later chain.
#[must_use]
pub fn classify(
    chains: &ChainSet,
    policy: &RotationPolicy,
    now: DateTime<Utc>,
) -> BTreeMap<BackupId, Option<RetentionBucket>> {
    let today = now.date_naive();
    let mut labels: BTreeMap<BackupId, Option<RetentionBucket>> = chains
        .chains()
        .iter()
        .map(|chain| (chain.id(), None))
        .collect();

    for kind in [
        BucketKind::Yearly,
        BucketKind::Monthly,
        BucketKind::Weekly,
        BucketKind::Daily,
    ] {
        let count = count_for(kind, policy);
        if count == 0 {
            continue;
        }

        let mut slots: BTreeMap<String, BackupId> = BTreeMap::new();
        for chain in chains.chains() {
            let key = slot_key(kind, chain.anchor().created_at.date_naive(), policy);
            slots.entry(key).or_insert_with(|| chain.id());
        }

        for (slot, anchor) in slots {
            let index = slot_index(kind, anchor.created_at().date_naive(), today, policy);
            if index >= i64::from(count) {
                continue;
            }
            if let Some(label) = labels.get_mut(&anchor) {
                if label.is_none() {
                    *label = Some(RetentionBucket { kind, slot, anchor });
                }
            }
        }
    }

    labels
}

/// Returns the chains no bucket claims whose state permits pruning,
/// oldest first.
///
/// RAW chains are never eligible: an unprepared backup has not been
/// through crash recovery, so pruning it would discard data nobody has
/// verified as replaceable.
#[must_use]
pub fn eligible_for_pruning<'a>(
    chains: &'a ChainSet,
    labels: &BTreeMap<BackupId, Option<RetentionBucket>>,
) -> Vec<&'a Chain> {
    chains
        .chains()
        .iter()
        .filter(|chain| {
            labels.get(&chain.id()).is_some_and(Option::is_none)
                && matches!(chain.state(), ChainState::Prepared | ChainState::Corrupt)
        })
        .collect()
}
