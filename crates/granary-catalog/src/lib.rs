//! # Granary Catalog
//!
//! The backup lifecycle engine: catalog, chains, scheduling, rotation,
//! preparation, and the orchestrator that drives them under the cluster
//! lock.
//!
//! ## Source of truth
//!
//! The catalog is never persisted as a monolithic database. Each backup
//! carries a JSON sidecar next to its artifact, and [`BackupCatalog::load`]
//! rebuilds the full picture by scanning the storage root. Losing every
//! in-memory structure loses nothing.
//!
//! ## Storage layout
//!
//! ```text
//! {backup_root}/
//! ├── 20240108T030000Z-full/            # artifact directory
//! ├── 20240108T030000Z-full.meta.json   # sidecar (the catalog record)
//! ├── 20240108T030000Z-full.prepared/   # staged prepared copy
//! ├── 20240110T030000Z-incr/
//! ├── 20240110T030000Z-incr.meta.json
//! └── locks/
//!     └── cluster.lock.json             # cluster-wide advisory lock
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use granary_catalog::{ChainTarget, Orchestrator, OrchestratorConfig};
//!
//! let orchestrator = Orchestrator::new(config, tool, notifier);
//!
//! // Take whatever the schedule calls for.
//! let report = orchestrator.run_backup(Utc::now(), false).await?;
//!
//! // Replay logs so the latest chain is restorable.
//! orchestrator.run_prepare(&ChainTarget::Latest).await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod chain;
pub mod error;
pub mod orchestrator;
pub mod prepare;
pub mod rotation;
pub mod scheduler;

pub use catalog::BackupCatalog;
pub use chain::{chains_of, Chain, ChainSet, ChainState, OrphanedIncrement};
pub use error::{Error, Result};
pub use orchestrator::{
    BackupReport, ChainStatus, ChainTarget, Orchestrator, OrchestratorConfig, RestoreReport,
    RotateSummary, StatusReport,
};
pub use prepare::{PrepareEngine, PrepareOptions, PrepareReport};
pub use rotation::{
    classify, eligible_for_pruning, week_start_of, BucketKind, RetentionBucket, RotateOutcome,
    RotatePlan, RotationEngine, RotationPolicy,
};
pub use scheduler::{decide, Decision};

/// Commonly used imports.
///
/// ```rust
/// use granary_catalog::prelude::*;
/// ```
pub mod prelude {
    pub use crate::catalog::BackupCatalog;
    pub use crate::chain::{chains_of, ChainSet, ChainState};
    pub use crate::error::{Error, Result};
    pub use crate::orchestrator::{ChainTarget, Orchestrator, OrchestratorConfig};
    pub use crate::rotation::{RotationEngine, RotationPolicy};
    pub use crate::scheduler::{decide, Decision};
}
