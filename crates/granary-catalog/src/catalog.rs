//! The backup catalog.
//!
//! The catalog is a sorted, in-memory view over the sidecar records in
//! the storage root. Storage is the source of truth: loading scans every
//! `*.meta.json` at the root, so a lost or stale catalog is rebuilt from
//! scratch by the next load. Mutations persist the sidecar before the
//! in-memory view changes, which keeps a crash between the two from
//! losing the write.
//!
//! A catalog that fails integrity verification does not load at all;
//! every lifecycle operation starts from a verified view.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use granary_core::{BackupEntry, BackupId, EntryState, StoreLayout};

use crate::error::{Error, Result};

/// Sorted view over the sidecar records of one storage root.
#[derive(Debug)]
pub struct BackupCatalog {
    layout: StoreLayout,
    entries: BTreeMap<BackupId, BackupEntry>,
}

impl BackupCatalog {
    /// Loads and verifies the catalog by scanning the storage root.
    ///
    /// A missing root is a fresh install and loads as an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CatalogCorrupt`] if any sidecar is unreadable,
    /// disagrees with its file name, references a missing base, misses
    /// its artifact directory, or leaves a gap in a pruned chain.
    pub async fn load(layout: StoreLayout) -> Result<Self> {
        let mut sidecars = Vec::new();
        let mut dir_names: HashSet<String> = HashSet::new();

        let mut reader = match tokio::fs::read_dir(layout.root()).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(root = %layout.root().display(), "backup root absent, catalog empty");
                return Ok(Self {
                    layout,
                    entries: BTreeMap::new(),
                });
            }
            Err(e) => {
                return Err(granary_core::Error::storage_with_source(
                    format!("read backup root {}", layout.root().display()),
                    e,
                )
                .into());
            }
        };

        loop {
            let dirent = reader.next_entry().await.map_err(|e| {
                granary_core::Error::storage_with_source(
                    format!("read backup root {}", layout.root().display()),
                    e,
                )
            })?;
            let Some(dirent) = dirent else { break };

            let name = dirent.file_name();
            let Some(name) = name.to_str() else { continue };

            if let Some(id_str) = StoreLayout::sidecar_id(name) {
                sidecars.push((id_str.to_string(), dirent.path()));
            } else {
                let file_type = dirent.file_type().await.map_err(|e| {
                    granary_core::Error::storage_with_source(format!("stat {name}"), e)
                })?;
                if file_type.is_dir() {
                    dir_names.insert(name.to_string());
                }
            }
        }

        let mut entries = BTreeMap::new();
        for (id_str, path) in sidecars {
            let data = tokio::fs::read(&path).await.map_err(|e| Error::CatalogCorrupt {
                message: format!("unreadable sidecar {}: {e}", path.display()),
            })?;
            let entry: BackupEntry =
                serde_json::from_slice(&data).map_err(|e| Error::CatalogCorrupt {
                    message: format!("malformed sidecar {}: {e}", path.display()),
                })?;

            if entry.id.to_string() != id_str {
                return Err(Error::CatalogCorrupt {
                    message: format!("sidecar {} records id {}", path.display(), entry.id),
                });
            }
            if entry.kind != entry.id.kind() {
                return Err(Error::CatalogCorrupt {
                    message: format!(
                        "entry {} kind {} disagrees with its identifier",
                        entry.id, entry.kind
                    ),
                });
            }
            entries.insert(entry.id, entry);
        }

        let catalog = Self { layout, entries };
        catalog.verify(&dir_names)?;
        tracing::debug!(entries = catalog.entries.len(), "catalog loaded");
        Ok(catalog)
    }

    /// Integrity checks over the loaded view.
    fn verify(&self, dir_names: &HashSet<String>) -> Result<()> {
        for entry in self.entries.values() {
            match entry.base_id {
                Some(base_id) if entry.is_full() => {
                    return Err(Error::CatalogCorrupt {
                        message: format!("full entry {} carries a base reference {base_id}", entry.id),
                    });
                }
                Some(base_id) => {
                    if !self.entries.contains_key(&base_id) {
                        return Err(Error::CatalogCorrupt {
                            message: format!(
                                "entry {} references missing base {}",
                                entry.id, base_id
                            ),
                        });
                    }
                }
                None if !entry.is_full() => {
                    return Err(Error::CatalogCorrupt {
                        message: format!("increment {} has no base reference", entry.id),
                    });
                }
                None => {}
            }
            if !entry.is_tombstoned() && !dir_names.contains(&entry.id.to_string()) {
                return Err(Error::CatalogCorrupt {
                    message: format!(
                        "artifact directory missing for {} (state {})",
                        entry.id, entry.state
                    ),
                });
            }
        }

        // Pruning removes increments newest-first, so a tombstoned
        // increment older than a live sibling means the chain has a gap
        // it can never replay across.
        let mut spans: HashMap<BackupId, (Option<BackupId>, Option<BackupId>)> = HashMap::new();
        for entry in self.entries.values() {
            let Some(base_id) = entry.base_id else { continue };
            let (min_pruned, max_live) = spans.entry(base_id).or_default();
            if entry.is_tombstoned() {
                *min_pruned = Some(min_pruned.map_or(entry.id, |p| p.min(entry.id)));
            } else {
                *max_live = Some(max_live.map_or(entry.id, |l| l.max(entry.id)));
            }
        }
        for (base_id, (min_pruned, max_live)) in &spans {
            if let (Some(pruned), Some(live)) = (min_pruned, max_live) {
                if pruned < live {
                    return Err(Error::CatalogCorrupt {
                        message: format!(
                            "chain {base_id} has pruned increment {pruned} older than live increment {live}"
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// Appends a new entry, persisting its sidecar first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] if an entry with this identifier
    /// already exists.
    pub async fn append(&mut self, entry: BackupEntry) -> Result<()> {
        if self.entries.contains_key(&entry.id) {
            return Err(Error::DuplicateId { id: entry.id });
        }
        self.persist(&entry).await?;
        tracing::debug!(id = %entry.id, kind = entry.kind.as_label(), "entry appended");
        self.entries.insert(entry.id, entry);
        Ok(())
    }

    /// Changes an entry's lifecycle state, persisting the sidecar first.
    ///
    /// Marking an entry with its current state is a no-op, so retried
    /// operations can re-mark freely.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the lifecycle forbids the
    /// change, or [`Error::EntryNotFound`] for an unknown identifier.
    pub async fn mark(&mut self, id: BackupId, state: EntryState) -> Result<()> {
        let entry = self.entries.get(&id).ok_or(Error::EntryNotFound { id })?;
        if entry.state == state {
            return Ok(());
        }
        if !entry.state.can_transition_to(state) {
            return Err(Error::InvalidTransition {
                id,
                from: entry.state,
                to: state,
            });
        }

        let from = entry.state;
        let mut updated = entry.clone();
        updated.state = state;
        self.persist(&updated).await?;
        self.entries.insert(id, updated);
        tracing::debug!(id = %id, from = from.as_label(), to = state.as_label(), "entry marked");
        Ok(())
    }

    /// Records the staged prepared copy of a FULL anchor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntryNotFound`] for an unknown identifier.
    pub async fn record_prepared_copy(
        &mut self,
        id: BackupId,
        prepared: impl Into<PathBuf>,
    ) -> Result<()> {
        let entry = self.entries.get(&id).ok_or(Error::EntryNotFound { id })?;
        let mut updated = entry.clone();
        updated.prepared_path = Some(prepared.into());
        self.persist(&updated).await?;
        self.entries.insert(id, updated);
        Ok(())
    }

    /// Writes an entry's sidecar atomically (write-then-rename).
    async fn persist(&self, entry: &BackupEntry) -> Result<()> {
        let path = self.layout.sidecar_path(&entry.id);
        let json = serde_json::to_vec_pretty(entry).map_err(|e| {
            granary_core::Error::serialization(format!("encode sidecar for {}: {e}", entry.id))
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await.map_err(|e| {
            granary_core::Error::storage_with_source(
                format!("write sidecar {}", tmp.display()),
                e,
            )
        })?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            granary_core::Error::storage_with_source(
                format!("commit sidecar {}", path.display()),
                e,
            )
        })?;
        Ok(())
    }

    /// Returns the entry with the given identifier.
    #[must_use]
    pub fn get(&self, id: &BackupId) -> Option<&BackupEntry> {
        self.entries.get(id)
    }

    /// Iterates entries in identifier (creation) order.
    pub fn entries(&self) -> impl Iterator<Item = &BackupEntry> {
        self.entries.values()
    }

    /// Returns the number of entries, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the catalog holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the layout this catalog was loaded from.
    #[must_use]
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granary_core::BackupKind;
    use granary_test_utils::TestStore;

    #[tokio::test]
    async fn missing_root_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = StoreLayout::new(dir.path().join("does-not-exist"));
        let catalog = BackupCatalog::load(layout).await.expect("load");
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn scan_rebuilds_catalog_in_creation_order() {
        let store = TestStore::new();
        let full = store.seed_full("2024-01-08T02:00:00Z", EntryState::Prepared);
        let incr = store.seed_incremental("2024-01-10T02:00:00Z", full.id, EntryState::Raw);

        let catalog = BackupCatalog::load(store.layout().clone())
            .await
            .expect("load");
        assert_eq!(catalog.len(), 2);

        let ids: Vec<BackupId> = catalog.entries().map(|e| e.id).collect();
        assert_eq!(ids, vec![full.id, incr.id]);
        assert_eq!(
            catalog.get(&incr.id).expect("incr").base_id,
            Some(full.id)
        );
    }

    #[tokio::test]
    async fn append_persists_and_rejects_duplicates() {
        let store = TestStore::new();
        let mut catalog = BackupCatalog::load(store.layout().clone())
            .await
            .expect("load");

        let at = granary_test_utils::ts("2024-01-08T02:00:00Z");
        let id = BackupId::new(BackupKind::Full, at);
        std::fs::create_dir_all(store.layout().artifact_dir(&id)).expect("artifact dir");
        let entry = BackupEntry::full(id, at, store.layout().artifact_dir(&id), 10);

        catalog.append(entry.clone()).await.expect("append");
        let err = catalog.append(entry).await.expect_err("duplicate");
        assert!(matches!(err, Error::DuplicateId { id: dup } if dup == id));

        // The sidecar is on disk, so a fresh scan sees the entry.
        let reloaded = BackupCatalog::load(store.layout().clone())
            .await
            .expect("reload");
        assert!(reloaded.get(&id).is_some());
    }

    #[tokio::test]
    async fn mark_persists_state_change() {
        let store = TestStore::new();
        let full = store.seed_full("2024-01-08T02:00:00Z", EntryState::Raw);

        let mut catalog = BackupCatalog::load(store.layout().clone())
            .await
            .expect("load");
        catalog
            .mark(full.id, EntryState::Prepared)
            .await
            .expect("mark");

        let reloaded = BackupCatalog::load(store.layout().clone())
            .await
            .expect("reload");
        assert_eq!(
            reloaded.get(&full.id).expect("entry").state,
            EntryState::Prepared
        );
    }

    #[tokio::test]
    async fn mark_is_idempotent_but_guards_transitions() {
        let store = TestStore::new();
        let full = store.seed_full("2024-01-08T02:00:00Z", EntryState::Prepared);

        let mut catalog = BackupCatalog::load(store.layout().clone())
            .await
            .expect("load");

        // Same-state marking is a no-op.
        catalog
            .mark(full.id, EntryState::Prepared)
            .await
            .expect("idempotent mark");

        // PREPARED never goes back to RAW.
        let err = catalog
            .mark(full.id, EntryState::Raw)
            .await
            .expect_err("must reject");
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: EntryState::Prepared,
                to: EntryState::Raw,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_base_fails_verification() {
        let store = TestStore::new();
        let phantom = BackupId::new(
            BackupKind::Full,
            granary_test_utils::ts("2024-01-01T02:00:00Z"),
        );
        store.seed_incremental("2024-01-10T02:00:00Z", phantom, EntryState::Raw);

        let err = BackupCatalog::load(store.layout().clone())
            .await
            .expect_err("must fail");
        assert!(matches!(err, Error::CatalogCorrupt { .. }));
        assert!(err.to_string().contains("missing base"));
    }

    #[tokio::test]
    async fn missing_artifact_dir_fails_verification() {
        let store = TestStore::new();
        let full = store.seed_full("2024-01-08T02:00:00Z", EntryState::Raw);
        std::fs::remove_dir_all(&full.storage_path).expect("remove artifact");

        let err = BackupCatalog::load(store.layout().clone())
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("artifact directory missing"));
    }

    #[tokio::test]
    async fn tombstones_need_no_artifact_dir() {
        let store = TestStore::new();
        let full = store.seed_full("2024-01-08T02:00:00Z", EntryState::Prepared);
        store.seed_incremental("2024-01-10T02:00:00Z", full.id, EntryState::Prepared);
        store.seed_incremental("2024-01-11T02:00:00Z", full.id, EntryState::Pruned);

        // Newest increment pruned, older live: no gap.
        let catalog = BackupCatalog::load(store.layout().clone())
            .await
            .expect("load");
        assert_eq!(catalog.len(), 3);
    }

    #[tokio::test]
    async fn pruned_gap_fails_verification() {
        let store = TestStore::new();
        let full = store.seed_full("2024-01-08T02:00:00Z", EntryState::Prepared);
        store.seed_incremental("2024-01-10T02:00:00Z", full.id, EntryState::Pruned);
        store.seed_incremental("2024-01-11T02:00:00Z", full.id, EntryState::Raw);

        let err = BackupCatalog::load(store.layout().clone())
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("pruned increment"));
    }

    #[tokio::test]
    async fn sidecar_kind_must_match_identifier() {
        let store = TestStore::new();
        let full = store.seed_full("2024-01-08T02:00:00Z", EntryState::Raw);

        // Rewrite the sidecar with a kind that contradicts the id suffix.
        let path = store.layout().sidecar_path(&full.id);
        let text = std::fs::read_to_string(&path).expect("read sidecar");
        std::fs::write(&path, text.replace("\"FULL\"", "\"INCREMENTAL\"")).expect("write");

        let err = BackupCatalog::load(store.layout().clone())
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("disagrees"));
    }
}
