//! The backup entry model: one record per physical backup artifact.
//!
//! Entries double as the on-disk sidecar schema (`<id>.meta.json` next to
//! each artifact directory). The catalog is rebuilt entirely by scanning
//! sidecars, so the schema is forward-compatible: unknown fields are
//! ignored on read and optional fields are omitted when absent.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::BackupId;

/// The two physical backup types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupKind {
    /// A complete, self-contained snapshot.
    Full,
    /// A delta against a prior FULL backup.
    Incremental,
}

impl BackupKind {
    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }

    /// Returns the short suffix embedded in backup identifiers.
    ///
    /// `full` sorts before `incr`, so identifiers created in the same
    /// second still order FULL before INCREMENTAL.
    #[must_use]
    pub const fn id_suffix(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incr",
        }
    }
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "FULL"),
            Self::Incremental => write!(f, "INCREMENTAL"),
        }
    }
}

/// Lifecycle state of a backup entry.
///
/// ```text
/// ┌─────┐ prepare ok ┌──────────┐
/// │ RAW │───────────►│ PREPARED │
/// └─────┘            └──────────┘
///    │                  │    ▲
///    │ prepare fails    │    │ re-prepare ok
///    │                  ▼    │
///    │               ┌─────────┐
///    └──────────────►│ CORRUPT │
///                    └─────────┘
///         any non-PRUNED state
///                    ┌─────────┐
///           ────────►│ PRUNED  │ (terminal tombstone)
///                    └─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryState {
    /// Taken but not prepared.
    Raw,
    /// Redo/undo logs applied; restorable.
    Prepared,
    /// Preparation or verification failed.
    Corrupt,
    /// Artifact removed from storage; record kept as a tombstone for audit.
    Pruned,
}

impl EntryState {
    /// Returns true if the transition from self to target is valid.
    ///
    /// Same-state transitions are not listed here; callers that want
    /// idempotent marking handle that case before consulting the table.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Raw => matches!(target, Self::Prepared | Self::Corrupt | Self::Pruned),
            Self::Prepared => matches!(target, Self::Corrupt | Self::Pruned),
            Self::Corrupt => matches!(target, Self::Prepared | Self::Pruned),
            Self::Pruned => false,
        }
    }

    /// Returns true if this is the terminal tombstone state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Pruned)
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Prepared => "prepared",
            Self::Corrupt => "corrupt",
            Self::Pruned => "pruned",
        }
    }
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw => write!(f, "RAW"),
            Self::Prepared => write!(f, "PREPARED"),
            Self::Corrupt => write!(f, "CORRUPT"),
            Self::Pruned => write!(f, "PRUNED"),
        }
    }
}

/// Metadata record for one physical backup artifact.
///
/// Serialized as the sidecar document next to the artifact directory.
/// `storage_path` is retained even on tombstones so audits can see where
/// the artifact used to live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    /// Stable identifier, derived from creation timestamp and kind.
    pub id: BackupId,

    /// FULL or INCREMENTAL.
    pub kind: BackupKind,

    /// When the backup was taken (UTC). Immutable.
    pub created_at: DateTime<Utc>,

    /// The FULL entry this one chains from. `None` for FULL entries.
    ///
    /// A back-reference only, never an ownership edge: resolution happens
    /// by identifier lookup in the catalog.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub base_id: Option<BackupId>,

    /// Current lifecycle state.
    pub state: EntryState,

    /// Artifact directory. Meaningful while state is not PRUNED.
    pub storage_path: PathBuf,

    /// Size of the artifact directory in bytes. Informational.
    #[serde(default)]
    pub size_bytes: u64,

    /// Staged prepared copy of a FULL anchor, when preparation ran
    /// against a copy instead of the artifact itself.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prepared_path: Option<PathBuf>,
}

impl BackupEntry {
    /// Creates a new FULL entry in RAW state.
    #[must_use]
    pub fn full(
        id: BackupId,
        created_at: DateTime<Utc>,
        storage_path: impl Into<PathBuf>,
        size_bytes: u64,
    ) -> Self {
        Self {
            id,
            kind: BackupKind::Full,
            created_at,
            base_id: None,
            state: EntryState::Raw,
            storage_path: storage_path.into(),
            size_bytes,
            prepared_path: None,
        }
    }

    /// Creates a new INCREMENTAL entry in RAW state, chained to `base_id`.
    #[must_use]
    pub fn incremental(
        id: BackupId,
        created_at: DateTime<Utc>,
        base_id: BackupId,
        storage_path: impl Into<PathBuf>,
        size_bytes: u64,
    ) -> Self {
        Self {
            id,
            kind: BackupKind::Incremental,
            created_at,
            base_id: Some(base_id),
            state: EntryState::Raw,
            storage_path: storage_path.into(),
            size_bytes,
            prepared_path: None,
        }
    }

    /// Returns true if this entry is a FULL backup.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.kind == BackupKind::Full
    }

    /// Returns true if this entry has been pruned from storage.
    #[must_use]
    pub fn is_tombstoned(&self) -> bool {
        self.state == EntryState::Pruned
    }
}
