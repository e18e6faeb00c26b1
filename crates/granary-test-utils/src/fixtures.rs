//! Pre-built fixtures for backup lifecycle tests.
//!
//! [`TestStore`] owns a temporary backup root and seeds it with artifact
//! directories and sidecar records the same way the real pipeline lays
//! them out, so catalog scans over fixtures behave exactly like scans
//! over production storage.

use std::path::Path;

use chrono::{DateTime, Utc};
use granary_core::{BackupEntry, BackupId, BackupKind, EntryState, StoreLayout};

/// Bytes written into each seeded artifact file.
const SEED_ARTIFACT_BYTES: u64 = 1024;

/// Parses an RFC 3339 timestamp for fixture construction.
pub fn ts(s: &str) -> DateTime<Utc> {
    s.parse().expect("valid RFC 3339 timestamp")
}

/// A temporary backup root with seeding helpers.
///
/// The directory is removed when the store is dropped.
pub struct TestStore {
    dir: tempfile::TempDir,
    layout: StoreLayout,
}

impl TestStore {
    /// Creates an empty backup root.
    #[must_use]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp backup root");
        let layout = StoreLayout::new(dir.path());
        Self { dir, layout }
    }

    /// Returns the layout over this store's root.
    #[must_use]
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Returns the backup root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Seeds a FULL backup taken at `at` in the given state.
    ///
    /// Creates the artifact directory (unless tombstoned) and the sidecar
    /// record, and returns the entry as the catalog will see it.
    pub fn seed_full(&self, at: &str, state: EntryState) -> BackupEntry {
        let created_at = ts(at);
        let id = BackupId::new(BackupKind::Full, created_at);
        let mut entry = BackupEntry::full(
            id,
            created_at,
            self.layout.artifact_dir(&id),
            SEED_ARTIFACT_BYTES,
        );
        entry.state = state;
        self.materialize(&entry);
        entry
    }

    /// Seeds an INCREMENTAL backup taken at `at`, chained to `base`.
    pub fn seed_incremental(&self, at: &str, base: BackupId, state: EntryState) -> BackupEntry {
        let created_at = ts(at);
        let id = BackupId::new(BackupKind::Incremental, created_at);
        let mut entry = BackupEntry::incremental(
            id,
            created_at,
            base,
            self.layout.artifact_dir(&id),
            SEED_ARTIFACT_BYTES,
        );
        entry.state = state;
        self.materialize(&entry);
        entry
    }

    /// Writes the sidecar for an arbitrary entry, without touching the
    /// artifact directory.
    pub fn write_sidecar(&self, entry: &BackupEntry) {
        let json = serde_json::to_vec_pretty(entry).expect("serialize sidecar");
        std::fs::write(self.layout.sidecar_path(&entry.id), json).expect("write sidecar");
    }

    fn materialize(&self, entry: &BackupEntry) {
        if !entry.is_tombstoned() {
            let dir = self.layout.artifact_dir(&entry.id);
            std::fs::create_dir_all(&dir).expect("create artifact dir");
            std::fs::write(
                dir.join("xtrabackup_checkpoints"),
                vec![0u8; usize::try_from(SEED_ARTIFACT_BYTES).unwrap()],
            )
            .expect("write artifact file");
        }
        self.write_sidecar(entry);
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_full_has_artifact_and_sidecar() {
        let store = TestStore::new();
        let entry = store.seed_full("2024-01-08T02:00:00Z", EntryState::Prepared);

        assert!(entry.storage_path.is_dir());
        assert!(store.layout().sidecar_path(&entry.id).is_file());
        assert_eq!(entry.state, EntryState::Prepared);
    }

    #[test]
    fn tombstoned_seed_has_no_artifact() {
        let store = TestStore::new();
        let entry = store.seed_full("2024-01-08T02:00:00Z", EntryState::Pruned);

        assert!(!entry.storage_path.exists());
        assert!(store.layout().sidecar_path(&entry.id).is_file());
    }
}
