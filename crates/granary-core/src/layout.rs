//! Canonical layout of the backup storage root.
//!
//! All path construction goes through [`StoreLayout`] so the on-disk
//! contract lives in exactly one place:
//!
//! ```text
//! {root}/
//! ├── locks/
//! │   └── cluster.lock.json        advisory lock, shared by every node
//! ├── {id}/                        artifact directory (tool output)
//! ├── {id}.meta.json               sidecar record for {id}
//! └── {id}.prepared/               staged prepared copy of a FULL anchor
//! ```

use std::path::{Path, PathBuf};

use crate::id::BackupId;

/// Suffix of sidecar metadata files.
pub const SIDECAR_SUFFIX: &str = ".meta.json";

/// Suffix of staged prepared copies.
pub const PREPARED_SUFFIX: &str = ".prepared";

/// Directory under the root holding lock files.
pub const LOCKS_DIR: &str = "locks";

/// File name of the cluster-wide backup lock.
pub const CLUSTER_LOCK_FILE: &str = "cluster.lock.json";

/// Path builder for a backup storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    /// Creates a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the storage root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the artifact directory for `id`.
    #[must_use]
    pub fn artifact_dir(&self, id: &BackupId) -> PathBuf {
        self.root.join(id.to_string())
    }

    /// Returns the sidecar metadata path for `id`.
    #[must_use]
    pub fn sidecar_path(&self, id: &BackupId) -> PathBuf {
        self.root.join(format!("{id}{SIDECAR_SUFFIX}"))
    }

    /// Returns the staged prepared-copy directory for `id`.
    #[must_use]
    pub fn prepared_dir(&self, id: &BackupId) -> PathBuf {
        self.root.join(format!("{id}{PREPARED_SUFFIX}"))
    }

    /// Returns the cluster lock file path.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCKS_DIR).join(CLUSTER_LOCK_FILE)
    }

    /// Extracts the identifier portion of a sidecar file name.
    ///
    /// Returns `None` for file names that are not sidecars.
    #[must_use]
    pub fn sidecar_id(file_name: &str) -> Option<&str> {
        file_name.strip_suffix(SIDECAR_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::BackupKind;

    fn sample_id() -> BackupId {
        BackupId::new(
            BackupKind::Full,
            "2024-01-15T08:00:00Z".parse().expect("timestamp"),
        )
    }

    #[test]
    fn paths_hang_off_the_root() {
        let layout = StoreLayout::new("/var/backups/mysql");
        let id = sample_id();

        assert_eq!(
            layout.artifact_dir(&id),
            PathBuf::from("/var/backups/mysql/20240115T080000Z-full")
        );
        assert_eq!(
            layout.sidecar_path(&id),
            PathBuf::from("/var/backups/mysql/20240115T080000Z-full.meta.json")
        );
        assert_eq!(
            layout.prepared_dir(&id),
            PathBuf::from("/var/backups/mysql/20240115T080000Z-full.prepared")
        );
        assert_eq!(
            layout.lock_path(),
            PathBuf::from("/var/backups/mysql/locks/cluster.lock.json")
        );
    }

    #[test]
    fn sidecar_id_strips_suffix() {
        assert_eq!(
            StoreLayout::sidecar_id("20240115T080000Z-full.meta.json"),
            Some("20240115T080000Z-full")
        );
        assert_eq!(StoreLayout::sidecar_id("20240115T080000Z-full"), None);
        assert_eq!(StoreLayout::sidecar_id("cluster.lock.json"), None);
    }
}
