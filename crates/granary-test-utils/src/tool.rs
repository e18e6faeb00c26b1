//! A scripted stand-in for the external backup tool.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use granary_core::tool::{BackupRequest, BackupTool, PrepareMode, PrepareRequest, TakenBackup};
use granary_core::{Error, Result};

/// One recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    /// A backup was taken.
    Backup {
        /// Directory the artifact was written into.
        target_dir: PathBuf,
        /// Base artifact directory for incrementals.
        incremental_base: Option<PathBuf>,
    },
    /// A prepare step ran.
    Prepare {
        /// Directory logs were applied to.
        target_dir: PathBuf,
        /// Log application mode.
        mode: PrepareMode,
        /// Incremental artifact applied, if any.
        incremental_dir: Option<PathBuf>,
    },
    /// A prepared backup was copied back.
    CopyBack {
        /// Prepared directory that was restored.
        prepared_dir: PathBuf,
        /// Destination data directory.
        data_dir: PathBuf,
    },
}

/// A [`BackupTool`] double that records every call and fails on cue.
///
/// Backups materialize a small artifact directory so catalog integrity
/// checks over the store still pass. Failures are one-shot: a scripted
/// prepare failure clears once it fires, which is what resume tests
/// need.
#[derive(Debug, Default)]
pub struct ScriptedTool {
    calls: Mutex<Vec<ToolCall>>,
    backup_failure: AtomicBool,
    prepare_failures: Mutex<HashSet<PathBuf>>,
}

impl ScriptedTool {
    /// Creates a tool double that succeeds at everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `take_backup` call fail.
    pub fn fail_next_backup(&self) {
        self.backup_failure.store(true, Ordering::SeqCst);
    }

    /// Makes the next prepare step touching `dir` fail.
    ///
    /// For incremental steps the incremental artifact directory is
    /// matched; for anchor steps the target directory is.
    pub fn fail_prepare_of(&self, dir: impl Into<PathBuf>) {
        self.prepare_failures.lock().unwrap().insert(dir.into());
    }

    /// Returns all recorded calls in order.
    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns only the recorded prepare steps, in order.
    pub fn prepare_calls(&self) -> Vec<ToolCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, ToolCall::Prepare { .. }))
            .collect()
    }
}

#[async_trait]
impl BackupTool for ScriptedTool {
    async fn take_backup(&self, request: &BackupRequest) -> Result<TakenBackup> {
        self.calls.lock().unwrap().push(ToolCall::Backup {
            target_dir: request.target_dir.clone(),
            incremental_base: request.incremental_base.clone(),
        });

        if self.backup_failure.swap(false, Ordering::SeqCst) {
            return Err(Error::tool("backup", "scripted failure"));
        }

        std::fs::create_dir_all(&request.target_dir)
            .map_err(|e| Error::storage_with_source("create scripted artifact", e))?;
        let marker = request.target_dir.join("xtrabackup_checkpoints");
        std::fs::write(&marker, b"scripted")
            .map_err(|e| Error::storage_with_source("write scripted artifact", e))?;

        Ok(TakenBackup {
            artifact_path: request.target_dir.clone(),
            size_bytes: 8,
        })
    }

    async fn prepare_step(&self, request: &PrepareRequest) -> Result<()> {
        self.calls.lock().unwrap().push(ToolCall::Prepare {
            target_dir: request.target_dir.clone(),
            mode: request.mode,
            incremental_dir: request.incremental_dir.clone(),
        });

        let key = request
            .incremental_dir
            .as_ref()
            .unwrap_or(&request.target_dir);
        if self.prepare_failures.lock().unwrap().remove(key) {
            return Err(Error::tool(
                "prepare",
                format!("scripted failure for {}", key.display()),
            ));
        }
        Ok(())
    }

    async fn copy_back(&self, prepared_dir: &Path, data_dir: &Path) -> Result<()> {
        self.calls.lock().unwrap().push(ToolCall::CopyBack {
            prepared_dir: prepared_dir.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
        });

        std::fs::create_dir_all(data_dir)
            .map_err(|e| Error::storage_with_source("create data dir", e))?;
        std::fs::write(data_dir.join("ibdata1"), b"restored")
            .map_err(|e| Error::storage_with_source("write restored marker", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_in_order() {
        let tool = ScriptedTool::new();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("full");

        tool.take_backup(&BackupRequest {
            target_dir: target.clone(),
            incremental_base: None,
        })
        .await
        .unwrap();
        tool.prepare_step(&PrepareRequest {
            target_dir: target.clone(),
            mode: PrepareMode::RedoUndo,
            incremental_dir: None,
        })
        .await
        .unwrap();

        let calls = tool.calls();
        assert_eq!(calls.len(), 2);
        assert!(matches!(calls[0], ToolCall::Backup { .. }));
        assert!(matches!(calls[1], ToolCall::Prepare { .. }));
    }

    #[tokio::test]
    async fn scripted_prepare_failure_fires_once() {
        let tool = ScriptedTool::new();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("full");
        tool.fail_prepare_of(&target);

        let request = PrepareRequest {
            target_dir: target.clone(),
            mode: PrepareMode::RedoOnly,
            incremental_dir: None,
        };
        assert!(tool.prepare_step(&request).await.is_err());
        assert!(tool.prepare_step(&request).await.is_ok());
    }
}
