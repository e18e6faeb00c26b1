//! The rotation engine: prune unclaimed chains, sweep leftovers.

use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use granary_core::layout::{LOCKS_DIR, PREPARED_SUFFIX};
use granary_core::{BackupId, EntryState};
use serde::Serialize;

use crate::catalog::BackupCatalog;
use crate::chain::{chains_of, ChainState};
use crate::error::Result;
use crate::rotation::classify::{classify, eligible_for_pruning};
use crate::rotation::policy::RotationPolicy;

/// What a rotation actually did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateOutcome {
    /// Chains fully tombstoned.
    pub chains_pruned: u64,

    /// Entries tombstoned across all pruned chains.
    pub entries_pruned: u64,

    /// Bytes attributed to the pruned chains.
    ///
    /// Counted when the chain tombstones; an artifact whose removal
    /// failed is reclaimed by a later sweep.
    pub bytes_reclaimed: u64,

    /// Leftover directories removed by the sweep phase.
    pub dirs_swept: u64,

    /// Chains a retention bucket claimed.
    pub retained: u64,

    /// Failures encountered along the way.
    pub errors: Vec<String>,
}

impl RotateOutcome {
    /// Merges another outcome into this one.
    pub fn merge(&mut self, other: Self) {
        self.chains_pruned += other.chains_pruned;
        self.entries_pruned += other.entries_pruned;
        self.bytes_reclaimed += other.bytes_reclaimed;
        self.dirs_swept += other.dirs_swept;
        self.retained += other.retained;
        self.errors.extend(other.errors);
    }

    /// Returns true if any failure was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// What a rotation would do, computed without mutating anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotatePlan {
    /// Anchors of the chains that would be pruned, oldest first.
    pub chains_to_prune: Vec<BackupId>,

    /// Entries across those chains.
    pub entries_to_prune: u64,

    /// Bytes across those chains.
    pub bytes_to_reclaim: u64,

    /// Unclaimed chains rotation must skip because they are still RAW.
    pub blocked_raw: Vec<BackupId>,

    /// Chains a retention bucket claimed.
    pub retained: u64,
}

/// Applies a [`RotationPolicy`] to a catalog.
#[derive(Debug, Clone)]
pub struct RotationEngine {
    policy: RotationPolicy,
}

impl RotationEngine {
    /// Creates an engine for the given policy.
    #[must_use]
    pub fn new(policy: RotationPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy this engine applies.
    #[must_use]
    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Computes what rotating at `now` would do. Pure; never mutates.
    #[must_use]
    pub fn plan(&self, catalog: &BackupCatalog, now: DateTime<Utc>) -> RotatePlan {
        let chains = chains_of(catalog);
        let labels = classify(&chains, &self.policy, now);
        let eligible = eligible_for_pruning(&chains, &labels);

        let entries: usize = eligible.iter().map(|c| c.entries().count()).sum();
        RotatePlan {
            chains_to_prune: eligible.iter().map(|c| c.id()).collect(),
            entries_to_prune: u64::try_from(entries).unwrap_or(u64::MAX),
            bytes_to_reclaim: eligible.iter().map(|c| c.total_bytes()).sum(),
            blocked_raw: chains
                .chains()
                .iter()
                .filter(|c| {
                    labels.get(&c.id()).is_some_and(Option::is_none)
                        && c.state() == ChainState::Raw
                })
                .map(|c| c.id())
                .collect(),
            retained: u64::try_from(labels.values().filter(|l| l.is_some()).count())
                .unwrap_or(u64::MAX),
        }
    }

    /// Prunes every unclaimed, prunable chain, then sweeps leftovers.
    ///
    /// Chains are isolated from each other: a failure inside one chain
    /// is recorded and the remaining chains still rotate.
    ///
    /// # Errors
    ///
    /// Returns an error only if the catalog's own bookkeeping fails in a
    /// way that makes continuing unsafe; per-chain and per-directory
    /// failures land in [`RotateOutcome::errors`] instead.
    pub async fn rotate(
        &self,
        catalog: &mut BackupCatalog,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome> {
        let started = Instant::now();
        let mut outcome = RotateOutcome::default();

        let chains = chains_of(catalog);
        let labels = classify(&chains, &self.policy, now);
        let eligible = eligible_for_pruning(&chains, &labels);
        outcome.retained =
            u64::try_from(labels.values().filter(|l| l.is_some()).count()).unwrap_or(u64::MAX);

        // Collect the work up front; pruning mutates the catalog.
        let mut work: Vec<(BackupId, Vec<BackupId>, u64)> = Vec::new();
        for chain in &eligible {
            // Increments fall newest-first so a crash mid-chain leaves a
            // contiguous prefix; the anchor goes last because increments
            // are useless without it.
            let mut order: Vec<BackupId> = chain.increments().iter().rev().map(|e| e.id).collect();
            order.push(chain.id());
            work.push((chain.id(), order, chain.total_bytes()));
        }

        for (anchor, order, bytes) in work {
            match prune_chain(catalog, &order, &mut outcome.errors).await {
                Ok(entries) => {
                    outcome.chains_pruned += 1;
                    outcome.entries_pruned += entries;
                    outcome.bytes_reclaimed += bytes;
                    tracing::debug!(chain = %anchor, entries, bytes, "chain pruned");
                }
                Err(e) => {
                    outcome.errors.push(format!("prune chain {anchor}: {e}"));
                }
            }
        }

        outcome.merge(sweep(catalog).await);

        tracing::info!(
            metric = "granary_rotate",
            chains_pruned = outcome.chains_pruned,
            entries_pruned = outcome.entries_pruned,
            bytes_reclaimed = outcome.bytes_reclaimed,
            dirs_swept = outcome.dirs_swept,
            retained = outcome.retained,
            errors = outcome.errors.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "rotation complete"
        );
        Ok(outcome)
    }
}

/// Tombstones and removes one chain's entries in the given order.
///
/// Tombstone before delete: a leftover artifact gets swept later, while
/// a live record without its artifact would fail the next catalog
/// verification.
async fn prune_chain(
    catalog: &mut BackupCatalog,
    order: &[BackupId],
    errors: &mut Vec<String>,
) -> Result<u64> {
    let mut pruned = 0u64;
    for id in order {
        let prepared = catalog.get(id).and_then(|e| e.prepared_path.clone());

        catalog.mark(*id, EntryState::Pruned).await?;
        pruned += 1;

        let artifact = catalog.layout().artifact_dir(id);
        if let Err(e) = remove_dir_if_present(&artifact).await {
            errors.push(format!("remove {}: {e}", artifact.display()));
        }
        if let Some(prepared) = prepared {
            if let Err(e) = remove_dir_if_present(&prepared).await {
                errors.push(format!("remove {}: {e}", prepared.display()));
            }
        }
    }
    Ok(pruned)
}

/// Removes leftover directories belonging to tombstoned entries.
///
/// Directories the catalog cannot attribute to any entry are logged and
/// left alone; rotation never deletes what it does not own.
async fn sweep(catalog: &BackupCatalog) -> RotateOutcome {
    let mut outcome = RotateOutcome::default();

    for entry in catalog.entries() {
        if !entry.is_tombstoned() {
            continue;
        }
        let leftovers = [
            catalog.layout().artifact_dir(&entry.id),
            catalog.layout().prepared_dir(&entry.id),
        ];
        for dir in leftovers {
            match remove_dir_if_present(&dir).await {
                Ok(true) => {
                    outcome.dirs_swept += 1;
                    tracing::debug!(dir = %dir.display(), "leftover tombstone directory swept");
                }
                Ok(false) => {}
                Err(e) => outcome.errors.push(format!("sweep {}: {e}", dir.display())),
            }
        }
    }

    let mut known: HashSet<String> = HashSet::new();
    known.insert(LOCKS_DIR.to_string());
    for entry in catalog.entries() {
        known.insert(entry.id.to_string());
        known.insert(format!("{}{PREPARED_SUFFIX}", entry.id));
    }

    match tokio::fs::read_dir(catalog.layout().root()).await {
        Ok(mut reader) => loop {
            match reader.next_entry().await {
                Ok(Some(dirent)) => {
                    let name = dirent.file_name();
                    let Some(name) = name.to_str() else { continue };
                    let is_dir = dirent.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                    if is_dir && !known.contains(name) {
                        tracing::warn!(dir = name, "unattributed directory in backup root");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    outcome.errors.push(format!("scan backup root: {e}"));
                    break;
                }
            }
        },
        Err(e) => outcome.errors.push(format!("scan backup root: {e}")),
    }

    outcome
}

async fn remove_dir_if_present(path: &Path) -> granary_core::Result<bool> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(granary_core::Error::storage_with_source(
            format!("remove {}", path.display()),
            e,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granary_test_utils::{ts, TestStore};

    async fn load(store: &TestStore) -> BackupCatalog {
        BackupCatalog::load(store.layout().clone())
            .await
            .expect("load catalog")
    }

    fn weekly_only() -> RotationPolicy {
        RotationPolicy {
            daily_count: 0,
            weekly_count: 1,
            monthly_count: 0,
            yearly_count: 0,
            ..RotationPolicy::default()
        }
    }

    #[tokio::test]
    async fn plan_reports_without_mutating() {
        let store = TestStore::new();
        let old = store.seed_full("2024-01-08T02:00:00Z", EntryState::Prepared);
        store.seed_incremental("2024-01-09T02:00:00Z", old.id, EntryState::Prepared);
        store.seed_full("2024-03-11T02:00:00Z", EntryState::Prepared);

        let catalog = load(&store).await;
        let plan = RotationEngine::new(weekly_only()).plan(&catalog, ts("2024-03-13T02:00:00Z"));

        assert_eq!(plan.chains_to_prune, vec![old.id]);
        assert_eq!(plan.entries_to_prune, 2);
        assert_eq!(plan.bytes_to_reclaim, 2048);
        assert_eq!(plan.retained, 1);
        assert!(plan.blocked_raw.is_empty());

        // Nothing moved on disk.
        assert!(store.layout().artifact_dir(&old.id).is_dir());
        assert_eq!(
            catalog.get(&old.id).expect("entry").state,
            EntryState::Prepared
        );
    }

    #[tokio::test]
    async fn rotate_tombstones_and_removes_artifacts() {
        let store = TestStore::new();
        let old = store.seed_full("2024-01-08T02:00:00Z", EntryState::Prepared);
        let old_incr =
            store.seed_incremental("2024-01-09T02:00:00Z", old.id, EntryState::Prepared);
        let current = store.seed_full("2024-03-11T02:00:00Z", EntryState::Prepared);

        let mut catalog = load(&store).await;
        let outcome = RotationEngine::new(weekly_only())
            .rotate(&mut catalog, ts("2024-03-13T02:00:00Z"))
            .await
            .expect("rotate");

        assert_eq!(outcome.chains_pruned, 1);
        assert_eq!(outcome.entries_pruned, 2);
        assert_eq!(outcome.bytes_reclaimed, 2048);
        assert!(!outcome.has_errors());

        // Artifacts are gone, sidecars remain as tombstones.
        assert!(!store.layout().artifact_dir(&old.id).exists());
        assert!(!store.layout().artifact_dir(&old_incr.id).exists());
        assert!(store.layout().sidecar_path(&old.id).is_file());

        let reloaded = load(&store).await;
        assert_eq!(
            reloaded.get(&old.id).expect("anchor").state,
            EntryState::Pruned
        );
        assert_eq!(
            reloaded.get(&old_incr.id).expect("incr").state,
            EntryState::Pruned
        );
        // The tombstone keeps the old location for audit.
        assert_eq!(
            reloaded.get(&old.id).expect("anchor").storage_path,
            store.layout().artifact_dir(&old.id)
        );
        assert_eq!(
            reloaded.get(&current.id).expect("current").state,
            EntryState::Prepared
        );
    }

    #[tokio::test]
    async fn raw_chains_block_and_are_reported() {
        let store = TestStore::new();
        let raw = store.seed_full("2024-01-08T02:00:00Z", EntryState::Raw);
        store.seed_full("2024-03-11T02:00:00Z", EntryState::Prepared);

        let mut catalog = load(&store).await;
        let engine = RotationEngine::new(weekly_only());

        let plan = engine.plan(&catalog, ts("2024-03-13T02:00:00Z"));
        assert_eq!(plan.blocked_raw, vec![raw.id]);
        assert!(plan.chains_to_prune.is_empty());

        let outcome = engine
            .rotate(&mut catalog, ts("2024-03-13T02:00:00Z"))
            .await
            .expect("rotate");
        assert_eq!(outcome.chains_pruned, 0);
        assert_eq!(
            catalog.get(&raw.id).expect("raw").state,
            EntryState::Raw
        );
    }

    #[tokio::test]
    async fn sweep_removes_leftover_tombstone_directories() {
        let store = TestStore::new();
        let ghost = store.seed_full("2024-01-08T02:00:00Z", EntryState::Pruned);
        store.seed_full("2024-03-11T02:00:00Z", EntryState::Prepared);

        // A crash between tombstoning and deletion leaves these behind.
        std::fs::create_dir_all(store.layout().artifact_dir(&ghost.id)).expect("artifact");
        std::fs::create_dir_all(store.layout().prepared_dir(&ghost.id)).expect("prepared");

        let mut catalog = load(&store).await;
        let outcome = RotationEngine::new(weekly_only())
            .rotate(&mut catalog, ts("2024-03-13T02:00:00Z"))
            .await
            .expect("rotate");

        assert_eq!(outcome.dirs_swept, 2);
        assert!(!store.layout().artifact_dir(&ghost.id).exists());
        assert!(!store.layout().prepared_dir(&ghost.id).exists());
    }

    #[test]
    fn outcome_merge_accumulates() {
        let mut a = RotateOutcome {
            chains_pruned: 1,
            entries_pruned: 3,
            bytes_reclaimed: 100,
            dirs_swept: 0,
            retained: 2,
            errors: vec!["first".into()],
        };
        a.merge(RotateOutcome {
            chains_pruned: 2,
            entries_pruned: 2,
            bytes_reclaimed: 50,
            dirs_swept: 1,
            retained: 0,
            errors: vec!["second".into()],
        });

        assert_eq!(a.chains_pruned, 3);
        assert_eq!(a.entries_pruned, 5);
        assert_eq!(a.bytes_reclaimed, 150);
        assert_eq!(a.dirs_swept, 1);
        assert_eq!(a.retained, 2);
        assert_eq!(a.errors, vec!["first".to_string(), "second".to_string()]);
        assert!(a.has_errors());
    }
}
