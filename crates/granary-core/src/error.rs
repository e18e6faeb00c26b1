//! Error types and result aliases shared across granary components.
//!
//! Domain-level errors (catalog corruption, chain orphans, preparation
//! failures) live in `granary-catalog`; this module covers the primitives:
//! identifiers, storage I/O, serialization, locking, and external tools.

use std::time::Duration;

/// The result type used throughout the core crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by granary's core primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the identifier invalid.
        message: String,
    },

    /// A filesystem or storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The cluster-wide backup lock could not be acquired in time.
    ///
    /// No mutation has occurred when this is returned; the invocation is
    /// safe to retry.
    #[error("cluster lock not acquired within {waited_secs}s (held by {holder})")]
    LockTimeout {
        /// How long acquisition was attempted, in whole seconds.
        waited_secs: u64,
        /// The holder observed on the last attempt.
        holder: String,
    },

    /// An external tool invocation failed.
    #[error("tool failure during {operation}: {message}")]
    Tool {
        /// The operation being driven (e.g. `backup`, `prepare`).
        operation: &'static str,
        /// Exit status and the tail of stderr, or the spawn failure.
        message: String,
    },

    /// Configuration was missing or invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration problem.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new tool error for the given operation.
    #[must_use]
    pub fn tool(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Tool {
            operation,
            message: message.into(),
        }
    }

    /// Creates a new lock timeout error.
    #[must_use]
    pub fn lock_timeout(waited: Duration, holder: impl Into<String>) -> Self {
        Self::LockTimeout {
            waited_secs: waited.as_secs(),
            holder: holder.into(),
        }
    }

    /// Returns true if the failed operation is safe to retry as-is.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}
