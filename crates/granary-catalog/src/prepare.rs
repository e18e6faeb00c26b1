//! Chain preparation: crash recovery applied step by step.
//!
//! Preparing a chain applies the tool's log-replay step to the anchor
//! and then each increment in creation order. Every step except the
//! chain's final one runs redo-only, because applying undo closes the
//! target to further increments; the final step (the last increment, or
//! the anchor of a lone-full chain) applies redo and undo and makes the
//! chain restorable.
//!
//! Each completed step is marked in the catalog before the next one
//! runs, so an interrupted preparation resumes exactly where it
//! stopped: the already-PREPARED prefix is skipped and work continues
//! from the first entry that still needs it. A failed step marks the
//! failing entry and everything after it CORRUPT; a later run retries
//! the CORRUPT suffix.
//!
//! By default preparation runs against a staged copy of the anchor so
//! the pristine artifact survives a botched prepare. `in_place` skips
//! the copy and spends no extra disk, trading away that safety.

use std::path::{Path, PathBuf};

use granary_core::tool::{BackupTool, PrepareMode, PrepareRequest};
use granary_core::{BackupId, EntryState};
use serde::Serialize;

use crate::catalog::BackupCatalog;
use crate::chain::{chains_of, Chain, ChainState};
use crate::error::{Error, Result};

/// How preparation uses disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrepareOptions {
    /// Apply logs directly to the anchor artifact instead of a staged
    /// copy.
    pub in_place: bool,
}

/// What a preparation run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareReport {
    /// The prepared chain's anchor.
    pub anchor: BackupId,

    /// Steps actually executed (zero when the chain was already
    /// prepared).
    pub steps_run: u32,

    /// The directory holding the prepared data.
    pub target_dir: PathBuf,
}

/// Drives the tool's prepare steps over one chain.
pub struct PrepareEngine<'a> {
    tool: &'a dyn BackupTool,
    options: PrepareOptions,
}

impl<'a> PrepareEngine<'a> {
    /// Creates an engine over the given tool.
    #[must_use]
    pub fn new(tool: &'a dyn BackupTool, options: PrepareOptions) -> Self {
        Self { tool, options }
    }

    /// Prepares the chain anchored by `anchor_id`, resuming if earlier
    /// work was interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChainNotFound`] if no live chain has that
    /// anchor, and [`Error::PreparationFailed`] when a step fails; the
    /// failing entry and everything after it are marked CORRUPT first.
    pub async fn prepare(
        &self,
        catalog: &mut BackupCatalog,
        anchor_id: BackupId,
    ) -> Result<PrepareReport> {
        let chain: Chain = chains_of(catalog)
            .find(anchor_id)
            .cloned()
            .ok_or_else(|| Error::ChainNotFound {
                target: anchor_id.to_string(),
            })?;

        if chain.state() == ChainState::Prepared {
            let target_dir = chain
                .anchor()
                .prepared_path
                .clone()
                .unwrap_or_else(|| chain.anchor().storage_path.clone());
            tracing::debug!(chain = %anchor_id, "chain already prepared");
            return Ok(PrepareReport {
                anchor: anchor_id,
                steps_run: 0,
                target_dir,
            });
        }

        let target_dir = self.resolve_target(catalog, &chain).await?;
        let increments = chain.increments();
        let mut steps_run = 0u32;

        if chain.anchor().state != EntryState::Prepared {
            let mode = if increments.is_empty() {
                PrepareMode::RedoUndo
            } else {
                PrepareMode::RedoOnly
            };
            let request = PrepareRequest {
                target_dir: target_dir.clone(),
                mode,
                incremental_dir: None,
            };
            tracing::debug!(chain = %anchor_id, step = %anchor_id, mode = mode.as_label(), "prepare step");
            if let Err(e) = self.tool.prepare_step(&request).await {
                let later: Vec<BackupId> = increments.iter().map(|i| i.id).collect();
                mark_failure(catalog, anchor_id, &later).await;
                return Err(Error::PreparationFailed {
                    id: anchor_id,
                    message: e.to_string(),
                });
            }
            catalog.mark(anchor_id, EntryState::Prepared).await?;
            steps_run += 1;
        }

        for (index, increment) in increments.iter().enumerate() {
            if increment.state == EntryState::Prepared {
                if steps_run > 0 {
                    // Marks go out strictly in step order, so a prepared
                    // entry after work ran means the records disagree
                    // with reality.
                    return Err(Error::CatalogCorrupt {
                        message: format!(
                            "chain {anchor_id} has prepared entry {} after unprepared ones",
                            increment.id
                        ),
                    });
                }
                continue;
            }

            let mode = if index + 1 == increments.len() {
                PrepareMode::RedoUndo
            } else {
                PrepareMode::RedoOnly
            };
            let request = PrepareRequest {
                target_dir: target_dir.clone(),
                mode,
                incremental_dir: Some(increment.storage_path.clone()),
            };
            tracing::debug!(chain = %anchor_id, step = %increment.id, mode = mode.as_label(), "prepare step");
            if let Err(e) = self.tool.prepare_step(&request).await {
                let later: Vec<BackupId> =
                    increments[index + 1..].iter().map(|i| i.id).collect();
                mark_failure(catalog, increment.id, &later).await;
                return Err(Error::PreparationFailed {
                    id: increment.id,
                    message: e.to_string(),
                });
            }
            catalog.mark(increment.id, EntryState::Prepared).await?;
            steps_run += 1;
        }

        tracing::info!(
            metric = "granary_prepare_steps",
            chain = %anchor_id,
            steps = steps_run,
            target = %target_dir.display(),
            "chain prepared"
        );
        Ok(PrepareReport {
            anchor: anchor_id,
            steps_run,
            target_dir,
        })
    }

    /// Picks the directory prepare steps run against, staging a copy of
    /// the anchor when configured to.
    async fn resolve_target(
        &self,
        catalog: &mut BackupCatalog,
        chain: &Chain,
    ) -> Result<PathBuf> {
        let anchor = chain.anchor();
        if self.options.in_place {
            return Ok(anchor.storage_path.clone());
        }

        if anchor.state == EntryState::Prepared {
            // Resuming after the anchor step. The staged copy must still
            // be there; without it the PREPARED prefix cannot be resumed
            // and the lifecycle has no path back to RAW.
            return match &anchor.prepared_path {
                Some(prepared) if dir_exists(prepared).await => Ok(prepared.clone()),
                Some(prepared) => Err(granary_core::Error::storage(format!(
                    "staged prepared copy {} is missing; chain {} cannot resume",
                    prepared.display(),
                    chain.id()
                ))
                .into()),
                // The anchor was prepared in place on an earlier run.
                None => Ok(anchor.storage_path.clone()),
            };
        }

        let staged = catalog.layout().prepared_dir(&chain.id());
        if dir_exists(&staged).await {
            // Leftover from an attempt that failed mid-anchor; stale log
            // state, start over.
            tokio::fs::remove_dir_all(&staged).await.map_err(|e| {
                granary_core::Error::storage_with_source(
                    format!("remove stale staged copy {}", staged.display()),
                    e,
                )
            })?;
        }
        copy_dir(&anchor.storage_path, &staged).await?;
        catalog.record_prepared_copy(chain.id(), &staged).await?;
        tracing::debug!(
            chain = %chain.id(),
            staged = %staged.display(),
            "anchor staged for preparation"
        );
        Ok(staged)
    }
}

/// Marks a failed step's entry and everything after it CORRUPT.
///
/// Best effort: a mark that cannot be persisted is logged, not raised,
/// so the original failure stays the reported error.
async fn mark_failure(catalog: &mut BackupCatalog, failed: BackupId, later: &[BackupId]) {
    for id in std::iter::once(failed).chain(later.iter().copied()) {
        if let Err(e) = catalog.mark(id, EntryState::Corrupt).await {
            tracing::warn!(id = %id, error = %e, "could not mark entry corrupt");
        }
    }
}

async fn dir_exists(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Copies a directory tree without recursion.
async fn copy_dir(source: &Path, dest: &Path) -> Result<()> {
    let context = |e: std::io::Error, what: &str, path: &Path| {
        granary_core::Error::storage_with_source(format!("{what} {}", path.display()), e)
    };

    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| context(e, "create", dest))?;

    let mut stack = vec![(source.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&from)
            .await
            .map_err(|e| context(e, "read", &from))?;
        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|e| context(e, "read", &from))?;
            let Some(entry) = entry else { break };

            let target = to.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| context(e, "stat", &entry.path()))?;
            if file_type.is_dir() {
                tokio::fs::create_dir_all(&target)
                    .await
                    .map_err(|e| context(e, "create", &target))?;
                stack.push((entry.path(), target));
            } else {
                tokio::fs::copy(entry.path(), &target)
                    .await
                    .map_err(|e| context(e, "copy", &entry.path()))?;
            }
        }
    }
    Ok(())
}
