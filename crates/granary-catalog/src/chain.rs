//! Backup chains: a FULL anchor plus its ordered increments.
//!
//! Chains are a read-only view derived from the catalog on demand; they
//! hold no state of their own. Every live entry belongs to exactly one
//! chain, except increments whose base can no longer serve as an anchor
//! (pruned, or not a FULL backup). Those are reported as orphans so the
//! orchestrator can flag them instead of silently ignoring them.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use granary_core::{BackupEntry, BackupId, EntryState};
use serde::Serialize;

use crate::catalog::BackupCatalog;

/// Aggregate state of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainState {
    /// At least one entry still needs preparation.
    Raw,

    /// Every entry is prepared; the chain is restorable.
    Prepared,

    /// At least one entry failed preparation.
    Corrupt,
}

impl ChainState {
    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Prepared => "prepared",
            Self::Corrupt => "corrupt",
        }
    }
}

impl std::fmt::Display for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw => write!(f, "RAW"),
            Self::Prepared => write!(f, "PREPARED"),
            Self::Corrupt => write!(f, "CORRUPT"),
        }
    }
}

/// A FULL anchor and its live increments, in creation order.
#[derive(Debug, Clone)]
pub struct Chain {
    anchor: BackupEntry,
    increments: Vec<BackupEntry>,
}

impl Chain {
    /// Returns the chain's identifier (the anchor's).
    #[must_use]
    pub fn id(&self) -> BackupId {
        self.anchor.id
    }

    /// Returns the FULL anchor entry.
    #[must_use]
    pub fn anchor(&self) -> &BackupEntry {
        &self.anchor
    }

    /// Returns the increments in creation order.
    #[must_use]
    pub fn increments(&self) -> &[BackupEntry] {
        &self.increments
    }

    /// Iterates the anchor followed by its increments.
    pub fn entries(&self) -> impl Iterator<Item = &BackupEntry> {
        std::iter::once(&self.anchor).chain(self.increments.iter())
    }

    /// Returns the aggregate chain state.
    ///
    /// Any CORRUPT entry makes the chain CORRUPT; otherwise the chain is
    /// PREPARED only once every entry is.
    #[must_use]
    pub fn state(&self) -> ChainState {
        let mut all_prepared = true;
        for entry in self.entries() {
            match entry.state {
                EntryState::Corrupt => return ChainState::Corrupt,
                EntryState::Prepared => {}
                _ => all_prepared = false,
            }
        }
        if all_prepared {
            ChainState::Prepared
        } else {
            ChainState::Raw
        }
    }

    /// Returns the total artifact size of the chain, in bytes.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.entries().map(|e| e.size_bytes).sum()
    }
}

/// An increment whose base cannot anchor a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedIncrement {
    /// The orphaned increment.
    pub id: BackupId,

    /// The base it references.
    pub base_id: BackupId,
}

/// Every chain in the catalog, plus any orphaned increments.
#[derive(Debug, Clone, Default)]
pub struct ChainSet {
    chains: Vec<Chain>,
    orphans: Vec<OrphanedIncrement>,
}

impl ChainSet {
    /// Returns the chains in anchor creation order.
    #[must_use]
    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    /// Returns increments that no chain could claim.
    #[must_use]
    pub fn orphans(&self) -> &[OrphanedIncrement] {
        &self.orphans
    }

    /// Returns true if there are no chains at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Returns the most recently anchored chain.
    #[must_use]
    pub fn latest(&self) -> Option<&Chain> {
        self.chains.last()
    }

    /// Returns the chain anchored by `id`.
    #[must_use]
    pub fn find(&self, id: BackupId) -> Option<&Chain> {
        self.chains.iter().find(|c| c.id() == id)
    }

    /// Returns the latest chain anchored on the given calendar day.
    #[must_use]
    pub fn find_by_date(&self, date: NaiveDate) -> Option<&Chain> {
        self.chains
            .iter()
            .rev()
            .find(|c| c.anchor.created_at.date_naive() == date)
    }
}

/// Partitions the catalog's live entries into chains.
///
/// Tombstoned entries are skipped entirely. Increments arrive in
/// creation order because the catalog iterates sorted by identifier.
#[must_use]
pub fn chains_of(catalog: &BackupCatalog) -> ChainSet {
    let mut anchors: BTreeMap<BackupId, Chain> = BTreeMap::new();
    let mut orphans = Vec::new();

    for entry in catalog.entries() {
        if entry.is_tombstoned() || !entry.is_full() {
            continue;
        }
        anchors.insert(
            entry.id,
            Chain {
                anchor: entry.clone(),
                increments: Vec::new(),
            },
        );
    }

    for entry in catalog.entries() {
        if entry.is_tombstoned() || entry.is_full() {
            continue;
        }
        // Verified at load: every increment carries a base reference.
        let Some(base_id) = entry.base_id else { continue };
        match anchors.get_mut(&base_id) {
            Some(chain) => chain.increments.push(entry.clone()),
            None => orphans.push(OrphanedIncrement {
                id: entry.id,
                base_id,
            }),
        }
    }

    ChainSet {
        chains: anchors.into_values().collect(),
        orphans,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granary_test_utils::TestStore;

    async fn load(store: &TestStore) -> BackupCatalog {
        BackupCatalog::load(store.layout().clone())
            .await
            .expect("load catalog")
    }

    #[tokio::test]
    async fn live_entries_partition_into_chains() {
        let store = TestStore::new();
        let f1 = store.seed_full("2024-01-08T02:00:00Z", EntryState::Prepared);
        let i1 = store.seed_incremental("2024-01-09T02:00:00Z", f1.id, EntryState::Prepared);
        let i2 = store.seed_incremental("2024-01-10T02:00:00Z", f1.id, EntryState::Prepared);
        let f2 = store.seed_full("2024-01-15T02:00:00Z", EntryState::Raw);

        let set = chains_of(&load(&store).await);
        assert_eq!(set.chains().len(), 2);
        assert!(set.orphans().is_empty());

        let first = set.find(f1.id).expect("first chain");
        let ids: Vec<BackupId> = first.increments().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![i1.id, i2.id]);

        let latest = set.latest().expect("latest");
        assert_eq!(latest.id(), f2.id);
        assert!(latest.increments().is_empty());
    }

    #[tokio::test]
    async fn chain_state_aggregates_entry_states() {
        let store = TestStore::new();
        let f1 = store.seed_full("2024-01-08T02:00:00Z", EntryState::Prepared);
        store.seed_incremental("2024-01-09T02:00:00Z", f1.id, EntryState::Prepared);

        let f2 = store.seed_full("2024-01-15T02:00:00Z", EntryState::Prepared);
        store.seed_incremental("2024-01-16T02:00:00Z", f2.id, EntryState::Raw);

        let f3 = store.seed_full("2024-01-22T02:00:00Z", EntryState::Prepared);
        store.seed_incremental("2024-01-23T02:00:00Z", f3.id, EntryState::Corrupt);

        let set = chains_of(&load(&store).await);
        assert_eq!(set.find(f1.id).expect("f1").state(), ChainState::Prepared);
        assert_eq!(set.find(f2.id).expect("f2").state(), ChainState::Raw);
        assert_eq!(set.find(f3.id).expect("f3").state(), ChainState::Corrupt);
    }

    #[tokio::test]
    async fn increment_on_pruned_base_is_orphaned() {
        let store = TestStore::new();
        let pruned = store.seed_full("2024-01-08T02:00:00Z", EntryState::Pruned);
        let orphan = store.seed_incremental("2024-01-09T02:00:00Z", pruned.id, EntryState::Raw);
        store.seed_full("2024-01-15T02:00:00Z", EntryState::Raw);

        let set = chains_of(&load(&store).await);
        assert_eq!(set.chains().len(), 1);
        assert_eq!(
            set.orphans(),
            &[OrphanedIncrement {
                id: orphan.id,
                base_id: pruned.id,
            }]
        );
    }

    #[tokio::test]
    async fn find_by_date_picks_latest_anchor_of_the_day() {
        let store = TestStore::new();
        store.seed_full("2024-01-08T02:00:00Z", EntryState::Raw);
        let evening = store.seed_full("2024-01-08T22:00:00Z", EntryState::Raw);

        let set = chains_of(&load(&store).await);
        let date = "2024-01-08".parse::<NaiveDate>().expect("date");
        assert_eq!(set.find_by_date(date).expect("chain").id(), evening.id);
        assert!(set
            .find_by_date("2024-02-01".parse().expect("date"))
            .is_none());
    }

    #[tokio::test]
    async fn total_bytes_sums_anchor_and_increments() {
        let store = TestStore::new();
        let f1 = store.seed_full("2024-01-08T02:00:00Z", EntryState::Raw);
        store.seed_incremental("2024-01-09T02:00:00Z", f1.id, EntryState::Raw);

        let set = chains_of(&load(&store).await);
        // Seeded artifacts are 1 KiB each.
        assert_eq!(set.find(f1.id).expect("chain").total_bytes(), 2048);
    }
}
