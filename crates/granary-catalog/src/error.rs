//! Errors raised by the catalog and lifecycle engine.

use granary_core::{BackupId, EntryState};

use crate::chain::ChainState;

/// The result type used throughout the catalog crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by catalog and lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The on-disk catalog failed an integrity check.
    ///
    /// Raised at load time; no operation runs against a catalog that
    /// does not verify.
    #[error("catalog corrupt: {message}")]
    CatalogCorrupt {
        /// Which check failed, and for which entry.
        message: String,
    },

    /// An entry with this identifier already exists.
    #[error("duplicate backup id {id}")]
    DuplicateId {
        /// The conflicting identifier.
        id: BackupId,
    },

    /// No entry with this identifier exists.
    #[error("no catalog entry with id {id}")]
    EntryNotFound {
        /// The identifier that was looked up.
        id: BackupId,
    },

    /// A state change violated the entry lifecycle.
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// The entry whose state change was rejected.
        id: BackupId,
        /// State before the attempted change.
        from: EntryState,
        /// The rejected target state.
        to: EntryState,
    },

    /// No chain matched the requested target.
    #[error("no backup chain matches target '{target}'")]
    ChainNotFound {
        /// The requested target (an identifier, a date, or `latest`).
        target: String,
    },

    /// A prepare step failed; the failing entry has been marked.
    #[error("preparation of {id} failed: {message}")]
    PreparationFailed {
        /// The entry whose prepare step failed.
        id: BackupId,
        /// What the tool reported.
        message: String,
    },

    /// Restore was requested for a chain that is not fully prepared.
    #[error("chain {id} is not restorable (state {state})")]
    NotRestorable {
        /// The chain's anchor identifier.
        id: BackupId,
        /// The chain's current state.
        state: ChainState,
    },

    /// An underlying primitive failed.
    #[error(transparent)]
    Core(#[from] granary_core::Error),
}

impl Error {
    /// Returns true if the failed operation is safe to retry as-is.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn lock_timeout_surfaces_as_retryable() {
        let err = Error::from(granary_core::Error::lock_timeout(
            Duration::from_secs(300),
            "node-2",
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn corruption_is_not_retryable() {
        let err = Error::CatalogCorrupt {
            message: "artifact directory missing".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("catalog corrupt"));
    }
}
