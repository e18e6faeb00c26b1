//! # Granary Core
//!
//! Shared primitives for the granary backup lifecycle manager:
//!
//! - **Identity**: timestamp-derived backup IDs ([`BackupId`])
//! - **Catalog model**: backup entries, kinds, and lifecycle states
//!   ([`BackupEntry`], [`BackupKind`], [`EntryState`])
//! - **Storage layout**: path conventions under the backup root
//!   ([`StoreLayout`])
//! - **Coordination**: the cluster-wide advisory lock ([`ClusterLock`])
//! - **Tool invocation**: the external physical-backup tool behind a
//!   trait ([`BackupTool`], [`XtrabackupTool`])
//! - **Notifications**: operator messaging ([`Notifier`])
//!
//! The lifecycle engine itself (catalog, chains, scheduling, rotation)
//! lives in `granary-catalog`; this crate holds what every layer shares.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod entry;
pub mod error;
pub mod id;
pub mod layout;
pub mod lock;
pub mod notify;
pub mod observability;
pub mod tool;

pub use entry::{BackupEntry, BackupKind, EntryState};
pub use error::{Error, Result};
pub use id::{BackupId, ParseBackupIdError};
pub use layout::StoreLayout;
pub use lock::{ClusterLock, LockGuard, LockInfo, DEFAULT_LOCK_TIMEOUT, DEFAULT_LOCK_TTL};
pub use notify::{LogNotifier, MailCommandNotifier, Notification, Notifier, Severity};
pub use observability::{init_logging, LogFormat};
pub use tool::{
    dir_size, BackupRequest, BackupTool, PrepareMode, PrepareRequest, TakenBackup, XtrabackupTool,
    DEFAULT_TOOL_TIMEOUT,
};

/// Commonly used imports.
///
/// ```rust
/// use granary_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::entry::{BackupEntry, BackupKind, EntryState};
    pub use crate::error::{Error, Result};
    pub use crate::id::BackupId;
    pub use crate::layout::StoreLayout;
    pub use crate::notify::{Notification, Notifier, Severity};
    pub use crate::tool::BackupTool;
}
