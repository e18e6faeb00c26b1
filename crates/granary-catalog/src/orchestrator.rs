//! Lifecycle orchestration.
//!
//! The orchestrator is the single entry point the CLI drives. Every
//! mutating operation follows the same shape: acquire the cluster lock,
//! load and verify the catalog from storage, do the work, release the
//! lock, and notify the operator about anything that needs eyes.
//! Failures notify at CRITICAL severity and then propagate; a lock that
//! could not be acquired means nothing was mutated.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use granary_core::tool::BackupRequest;
use granary_core::{
    BackupEntry, BackupId, BackupKind, BackupTool, ClusterLock, LockGuard, Notification, Notifier,
    Severity, StoreLayout,
};
use serde::Serialize;

use crate::catalog::BackupCatalog;
use crate::chain::{chains_of, Chain, ChainSet, ChainState, OrphanedIncrement};
use crate::error::{Error, Result};
use crate::prepare::{PrepareEngine, PrepareOptions, PrepareReport};
use crate::rotation::{
    classify, RetentionBucket, RotateOutcome, RotatePlan, RotationEngine, RotationPolicy,
};
use crate::scheduler::{decide, Decision};

/// Which chain an operation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainTarget {
    /// The most recently anchored chain.
    Latest,

    /// The latest chain anchored on a calendar day.
    AnchorDate(NaiveDate),

    /// The chain with this exact anchor.
    Anchor(BackupId),
}

/// Settings the orchestrator is built from.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// The shared backup storage root.
    pub backup_root: PathBuf,

    /// The database data directory restores write into.
    pub data_dir: PathBuf,

    /// Retention policy, also the source of the scheduling week.
    pub policy: RotationPolicy,

    /// How preparation uses disk.
    pub prepare: PrepareOptions,

    /// TTL written into the cluster lock.
    pub lock_ttl: Duration,

    /// How long to wait for the cluster lock.
    pub lock_timeout: Duration,
}

/// A backup that was just taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupReport {
    /// The new entry's identifier.
    pub id: BackupId,

    /// FULL or INCREMENTAL.
    pub kind: BackupKind,

    /// The anchor chained onto, for increments.
    pub base_id: Option<BackupId>,

    /// Where the artifact landed.
    pub artifact_path: PathBuf,

    /// Artifact size in bytes.
    pub size_bytes: u64,
}

/// A restore that completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    /// The restored chain's anchor.
    pub anchor: BackupId,

    /// The prepared directory data was copied from.
    pub source_dir: PathBuf,

    /// The data directory data was copied into.
    pub data_dir: PathBuf,
}

/// What a rotation invocation produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RotateSummary {
    /// Dry run: the plan, nothing mutated.
    Planned(RotatePlan),

    /// The rotation ran; what it did.
    Executed(RotateOutcome),
}

/// One chain's row in a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatus {
    /// The chain's anchor.
    pub anchor: BackupId,

    /// When the anchor was taken.
    pub created_at: DateTime<Utc>,

    /// Aggregate chain state.
    pub state: ChainState,

    /// Entries in the chain, anchor included.
    pub entries: u64,

    /// Total artifact bytes.
    pub total_bytes: u64,

    /// The retention slot claiming this chain, if any.
    pub bucket: Option<RetentionBucket>,
}

/// A read-only snapshot of the catalog's health.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Live chains, oldest first.
    pub chains: Vec<ChainStatus>,

    /// Increments no chain can claim.
    pub orphans: Vec<OrphanedIncrement>,

    /// Tombstoned entries still recorded in the catalog, oldest first.
    pub tombstoned: Vec<BackupId>,

    /// What kind the next scheduled backup would be.
    pub next_backup: BackupKind,
}

/// Drives the backup lifecycle under the cluster lock.
pub struct Orchestrator {
    layout: StoreLayout,
    lock: ClusterLock,
    tool: Arc<dyn BackupTool>,
    notifier: Arc<dyn Notifier>,
    policy: RotationPolicy,
    prepare_options: PrepareOptions,
    data_dir: PathBuf,
    lock_ttl: Duration,
    lock_timeout: Duration,
}

impl Orchestrator {
    /// Builds an orchestrator over the given tool and notifier.
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
        tool: Arc<dyn BackupTool>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let layout = StoreLayout::new(&config.backup_root);
        let lock = ClusterLock::new(layout.lock_path());
        Self {
            layout,
            lock,
            tool,
            notifier,
            policy: config.policy,
            prepare_options: config.prepare,
            data_dir: config.data_dir,
            lock_ttl: config.lock_ttl,
            lock_timeout: config.lock_timeout,
        }
    }

    /// Takes the scheduled backup (or a forced FULL).
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateId`] before the tool runs if a backup
    /// with the derived identifier already exists, and propagates lock,
    /// catalog, and tool failures. All failures notify at CRITICAL.
    pub async fn run_backup(&self, now: DateTime<Utc>, force_full: bool) -> Result<BackupReport> {
        let guard = match self.acquire("backup").await {
            Ok(guard) => guard,
            Err(e) => {
                self.notify_failure("backup", &e).await;
                return Err(e);
            }
        };
        let result = self.backup_locked(now, force_full).await;
        self.finish("backup", guard, result).await
    }

    /// Prepares the targeted chain, resuming interrupted work.
    ///
    /// # Errors
    ///
    /// Propagates lock, catalog, and preparation failures; all notify
    /// at CRITICAL.
    pub async fn run_prepare(&self, target: &ChainTarget) -> Result<PrepareReport> {
        let guard = match self.acquire("prepare").await {
            Ok(guard) => guard,
            Err(e) => {
                self.notify_failure("prepare", &e).await;
                return Err(e);
            }
        };
        let result = self.prepare_locked(target).await;
        self.finish("prepare", guard, result).await
    }

    /// Restores the targeted chain into the data directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotRestorable`] for a chain that is not fully
    /// prepared and refuses a non-empty data directory; neither case
    /// mutates anything.
    pub async fn run_restore(&self, target: &ChainTarget) -> Result<RestoreReport> {
        let guard = match self.acquire("restore").await {
            Ok(guard) => guard,
            Err(e) => {
                self.notify_failure("restore", &e).await;
                return Err(e);
            }
        };
        let result = self.restore_locked(target).await;
        self.finish("restore", guard, result).await
    }

    /// Applies the retention policy; `dry_run` plans without the lock
    /// and without mutating.
    ///
    /// # Errors
    ///
    /// Propagates lock and catalog failures. A completed rotation with
    /// per-chain errors still returns the outcome; the errors ride in
    /// it and are notified at CRITICAL.
    pub async fn run_rotate(&self, now: DateTime<Utc>, dry_run: bool) -> Result<RotateSummary> {
        if dry_run {
            let catalog = BackupCatalog::load(self.layout.clone()).await?;
            let plan = RotationEngine::new(self.policy.clone()).plan(&catalog, now);
            return Ok(RotateSummary::Planned(plan));
        }

        let guard = match self.acquire("rotate").await {
            Ok(guard) => guard,
            Err(e) => {
                self.notify_failure("rotate", &e).await;
                return Err(e);
            }
        };
        let result = self.rotate_locked(now).await;
        self.finish("rotate", guard, result)
            .await
            .map(RotateSummary::Executed)
    }

    /// Reports catalog health. Read-only; takes no lock.
    ///
    /// # Errors
    ///
    /// Propagates catalog load failures.
    pub async fn status(&self, now: DateTime<Utc>) -> Result<StatusReport> {
        let catalog = BackupCatalog::load(self.layout.clone()).await?;
        let chains = chains_of(&catalog);
        let labels = classify(&chains, &self.policy, now);
        let next_backup = decide(now, &chains, &self.policy).kind();

        let chain_rows = chains
            .chains()
            .iter()
            .map(|chain| ChainStatus {
                anchor: chain.id(),
                created_at: chain.anchor().created_at,
                state: chain.state(),
                entries: u64::try_from(chain.entries().count()).unwrap_or(u64::MAX),
                total_bytes: chain.total_bytes(),
                bucket: labels.get(&chain.id()).cloned().flatten(),
            })
            .collect();

        let tombstoned = catalog
            .entries()
            .filter(|e| e.is_tombstoned())
            .map(|e| e.id)
            .collect();
        Ok(StatusReport {
            chains: chain_rows,
            orphans: chains.orphans().to_vec(),
            tombstoned,
            next_backup,
        })
    }

    async fn backup_locked(&self, now: DateTime<Utc>, force_full: bool) -> Result<BackupReport> {
        let mut catalog = BackupCatalog::load(self.layout.clone()).await?;
        let chains = chains_of(&catalog);
        self.report_orphans(&chains).await;

        let decision = if force_full {
            Decision::Full
        } else {
            decide(now, &chains, &self.policy)
        };
        let kind = decision.kind();
        let id = BackupId::new(kind, now);
        if catalog.get(&id).is_some() {
            // Caught before the tool runs; a same-second rerun must not
            // clobber an existing artifact.
            return Err(Error::DuplicateId { id });
        }

        let (base_id, incremental_base) = match decision {
            Decision::Full => (None, None),
            Decision::Incremental { base_id, base_path } => (Some(base_id), Some(base_path)),
        };

        tokio::fs::create_dir_all(self.layout.root())
            .await
            .map_err(|e| {
                granary_core::Error::storage_with_source(
                    format!("create backup root {}", self.layout.root().display()),
                    e,
                )
            })?;

        let request = BackupRequest {
            target_dir: self.layout.artifact_dir(&id),
            incremental_base,
        };
        let taken = match self.tool.take_backup(&request).await {
            Ok(taken) => taken,
            Err(e) => {
                // A partial artifact must not look like a backup to the
                // next scan.
                if let Err(cleanup) = tokio::fs::remove_dir_all(&request.target_dir).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(
                            dir = %request.target_dir.display(),
                            error = %cleanup,
                            "could not remove partial artifact"
                        );
                    }
                }
                return Err(e.into());
            }
        };

        let entry = match base_id {
            None => BackupEntry::full(id, id.created_at(), &taken.artifact_path, taken.size_bytes),
            Some(base) => BackupEntry::incremental(
                id,
                id.created_at(),
                base,
                &taken.artifact_path,
                taken.size_bytes,
            ),
        };
        catalog.append(entry).await?;

        tracing::info!(
            metric = "granary_backup",
            id = %id,
            kind = kind.as_label(),
            bytes = taken.size_bytes,
            "backup complete"
        );
        Ok(BackupReport {
            id,
            kind,
            base_id,
            artifact_path: taken.artifact_path,
            size_bytes: taken.size_bytes,
        })
    }

    async fn prepare_locked(&self, target: &ChainTarget) -> Result<PrepareReport> {
        let mut catalog = BackupCatalog::load(self.layout.clone()).await?;
        let anchor = {
            let chains = chains_of(&catalog);
            resolve_chain(&chains, target)?.id()
        };
        PrepareEngine::new(self.tool.as_ref(), self.prepare_options)
            .prepare(&mut catalog, anchor)
            .await
    }

    async fn restore_locked(&self, target: &ChainTarget) -> Result<RestoreReport> {
        let catalog = BackupCatalog::load(self.layout.clone()).await?;
        let chains = chains_of(&catalog);
        let chain = resolve_chain(&chains, target)?;

        if chain.state() != ChainState::Prepared {
            return Err(Error::NotRestorable {
                id: chain.id(),
                state: chain.state(),
            });
        }

        let source = chain
            .anchor()
            .prepared_path
            .clone()
            .unwrap_or_else(|| chain.anchor().storage_path.clone());

        self.ensure_empty_data_dir().await?;
        self.tool.copy_back(&source, &self.data_dir).await?;

        tracing::info!(
            metric = "granary_restore",
            chain = %chain.id(),
            data_dir = %self.data_dir.display(),
            "restore complete"
        );
        Ok(RestoreReport {
            anchor: chain.id(),
            source_dir: source,
            data_dir: self.data_dir.clone(),
        })
    }

    async fn rotate_locked(&self, now: DateTime<Utc>) -> Result<RotateOutcome> {
        let mut catalog = BackupCatalog::load(self.layout.clone()).await?;
        self.report_orphans(&chains_of(&catalog)).await;

        let engine = RotationEngine::new(self.policy.clone());
        let plan = engine.plan(&catalog, now);
        let outcome = engine.rotate(&mut catalog, now).await?;

        if !plan.blocked_raw.is_empty() {
            let list = join_ids(&plan.blocked_raw);
            self.notify(Notification::new(
                Severity::Warning,
                "rotation blocked on unprepared chains",
                format!(
                    "these chains fell out of retention but are still RAW; \
                     prepare or prune them explicitly: {list}"
                ),
            ))
            .await;
        }

        if outcome.has_errors() {
            self.notify(Notification::new(
                Severity::Critical,
                "rotation completed with errors",
                outcome.errors.join("\n"),
            ))
            .await;
        } else {
            self.notify(Notification::new(
                Severity::Info,
                "rotation complete",
                format!(
                    "pruned {} chains ({} entries, {} bytes), swept {} leftover dirs, {} chains retained",
                    outcome.chains_pruned,
                    outcome.entries_pruned,
                    outcome.bytes_reclaimed,
                    outcome.dirs_swept,
                    outcome.retained
                ),
            ))
            .await;
        }
        Ok(outcome)
    }

    async fn acquire(&self, operation: &'static str) -> Result<LockGuard> {
        let guard = self
            .lock
            .acquire_with_operation(self.lock_ttl, self.lock_timeout, Some(operation.to_string()))
            .await?;
        Ok(guard)
    }

    /// Releases the lock and turns an inner failure into a CRITICAL
    /// notification before propagating it.
    async fn finish<T>(
        &self,
        operation: &'static str,
        guard: LockGuard,
        result: Result<T>,
    ) -> Result<T> {
        if let Err(e) = guard.release().await {
            tracing::warn!(operation, error = %e, "lock release failed");
        }
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                self.notify_failure(operation, &e).await;
                Err(e)
            }
        }
    }

    async fn ensure_empty_data_dir(&self) -> Result<()> {
        match tokio::fs::read_dir(&self.data_dir).await {
            Ok(mut reader) => {
                let first = reader.next_entry().await.map_err(|e| {
                    granary_core::Error::storage_with_source(
                        format!("read data directory {}", self.data_dir.display()),
                        e,
                    )
                })?;
                if first.is_some() {
                    return Err(granary_core::Error::storage(format!(
                        "data directory {} is not empty; refusing to restore over it",
                        self.data_dir.display()
                    ))
                    .into());
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&self.data_dir).await.map_err(|e| {
                    granary_core::Error::storage_with_source(
                        format!("create data directory {}", self.data_dir.display()),
                        e,
                    )
                })?;
                Ok(())
            }
            Err(e) => Err(granary_core::Error::storage_with_source(
                format!("read data directory {}", self.data_dir.display()),
                e,
            )
            .into()),
        }
    }

    async fn report_orphans(&self, chains: &ChainSet) {
        if chains.orphans().is_empty() {
            return;
        }
        let list = chains
            .orphans()
            .iter()
            .map(|o| format!("{} (base {})", o.id, o.base_id))
            .collect::<Vec<_>>()
            .join(", ");
        self.notify(Notification::new(
            Severity::Warning,
            "orphaned increments in catalog",
            format!("increments no chain can claim: {list}"),
        ))
        .await;
    }

    async fn notify_failure(&self, operation: &'static str, error: &Error) {
        self.notify(Notification::new(
            Severity::Critical,
            format!("{operation} failed"),
            error.to_string(),
        ))
        .await;
    }

    /// Delivery failures are logged, never raised; a broken mailer must
    /// not fail a backup.
    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::warn!(
                subject = %notification.subject,
                error = %e,
                "notification delivery failed"
            );
        }
    }
}

fn join_ids(ids: &[BackupId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolves a target against the current chains.
fn resolve_chain<'c>(chains: &'c ChainSet, target: &ChainTarget) -> Result<&'c Chain> {
    match target {
        ChainTarget::Latest => chains.latest().ok_or_else(|| Error::ChainNotFound {
            target: "latest".to_string(),
        }),
        ChainTarget::AnchorDate(date) => {
            chains
                .find_by_date(*date)
                .ok_or_else(|| Error::ChainNotFound {
                    target: date.to_string(),
                })
        }
        ChainTarget::Anchor(id) => chains.find(*id).ok_or_else(|| Error::ChainNotFound {
            target: id.to_string(),
        }),
    }
}
