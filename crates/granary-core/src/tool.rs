//! Backup tool invocation.
//!
//! The [`BackupTool`] trait abstracts the external physical-backup tool so
//! the lifecycle engine can be exercised against a scripted double in
//! tests. [`XtrabackupTool`] is the production implementation, shelling
//! out to Percona XtraBackup for taking backups, replaying logs during
//! preparation, and copying prepared data back into an empty data
//! directory.
//!
//! All invocations run under a timeout and surface the tail of stderr in
//! errors, since the tool writes its diagnostics there.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Default tool invocation timeout. Full backups of large data
/// directories can legitimately run for most of a day.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(24 * 3600);

/// How redo and undo logs are applied during a prepare step.
///
/// A backup that expects further incrementals on top must only roll
/// forward (redo); rolling back uncommitted transactions (undo) would
/// leave it unable to accept the next incremental. The final step of a
/// preparation applies both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareMode {
    /// Apply redo logs only; the backup stays open for incrementals.
    RedoOnly,

    /// Apply redo and undo logs; the backup becomes restorable.
    RedoUndo,
}

impl PrepareMode {
    /// Returns a label for logging.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::RedoOnly => "redo-only",
            Self::RedoUndo => "redo-undo",
        }
    }
}

/// Parameters for taking a new backup.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    /// Directory the tool writes the new artifact into.
    pub target_dir: PathBuf,

    /// Artifact directory of the base backup, for incrementals.
    pub incremental_base: Option<PathBuf>,
}

/// A successfully taken backup artifact.
#[derive(Debug, Clone)]
pub struct TakenBackup {
    /// Directory holding the artifact.
    pub artifact_path: PathBuf,

    /// Total artifact size in bytes.
    pub size_bytes: u64,
}

/// Parameters for a single prepare step.
#[derive(Debug, Clone)]
pub struct PrepareRequest {
    /// Directory being prepared (the anchor copy logs are applied to).
    pub target_dir: PathBuf,

    /// Log application mode for this step.
    pub mode: PrepareMode,

    /// Incremental artifact applied onto the target, if any.
    pub incremental_dir: Option<PathBuf>,
}

/// Interface to the external physical-backup tool.
#[async_trait]
pub trait BackupTool: Send + Sync {
    /// Takes a new backup into `request.target_dir`.
    async fn take_backup(&self, request: &BackupRequest) -> Result<TakenBackup>;

    /// Runs one prepare step against `request.target_dir`.
    async fn prepare_step(&self, request: &PrepareRequest) -> Result<()>;

    /// Copies a prepared backup into an empty data directory.
    async fn copy_back(&self, prepared_dir: &Path, data_dir: &Path) -> Result<()>;
}

/// Percona XtraBackup invocation.
#[derive(Debug, Clone)]
pub struct XtrabackupTool {
    binary: PathBuf,
    compress: bool,
    timeout: Duration,
}

impl XtrabackupTool {
    /// Creates a tool handle for the given binary path.
    ///
    /// Compression is on and the timeout is [`DEFAULT_TOOL_TIMEOUT`]
    /// unless overridden.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            compress: true,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Sets whether artifacts are compressed on write (and decompressed
    /// during prepare).
    #[must_use]
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Sets the per-invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn backup_args(&self, request: &BackupRequest) -> Vec<OsString> {
        let mut args = vec![OsString::from("--backup")];
        if self.compress {
            args.push(OsString::from("--compress"));
        }
        args.push(flag_with_path("--target-dir=", &request.target_dir));
        if let Some(base) = &request.incremental_base {
            args.push(flag_with_path("--incremental-basedir=", base));
        }
        args
    }

    fn prepare_args(&self, request: &PrepareRequest) -> Vec<OsString> {
        let mut args = vec![OsString::from("--prepare")];
        if self.compress {
            args.push(OsString::from("--decompress"));
        }
        if request.mode == PrepareMode::RedoOnly {
            args.push(OsString::from("--apply-log-only"));
        }
        args.push(flag_with_path("--target-dir=", &request.target_dir));
        if let Some(incremental) = &request.incremental_dir {
            args.push(flag_with_path("--incremental-dir=", incremental));
        }
        args
    }

    fn copy_back_args(&self, prepared_dir: &Path, data_dir: &Path) -> Vec<OsString> {
        vec![
            OsString::from("--copy-back"),
            flag_with_path("--target-dir=", prepared_dir),
            flag_with_path("--datadir=", data_dir),
        ]
    }
}

#[async_trait]
impl BackupTool for XtrabackupTool {
    async fn take_backup(&self, request: &BackupRequest) -> Result<TakenBackup> {
        let args = self.backup_args(request);
        run_tool(&self.binary, &args, "backup", self.timeout).await?;

        let size_bytes = dir_size(&request.target_dir).await?;
        Ok(TakenBackup {
            artifact_path: request.target_dir.clone(),
            size_bytes,
        })
    }

    async fn prepare_step(&self, request: &PrepareRequest) -> Result<()> {
        let args = self.prepare_args(request);
        run_tool(&self.binary, &args, "prepare", self.timeout).await?;
        Ok(())
    }

    async fn copy_back(&self, prepared_dir: &Path, data_dir: &Path) -> Result<()> {
        let args = self.copy_back_args(prepared_dir, data_dir);
        run_tool(&self.binary, &args, "restore", self.timeout).await?;
        Ok(())
    }
}

/// Runs the tool binary and waits for completion under a timeout.
async fn run_tool(
    binary: &Path,
    args: &[OsString],
    operation: &'static str,
    timeout: Duration,
) -> Result<std::process::Output> {
    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(
        binary = %binary.display(),
        ?args,
        operation,
        "invoking backup tool"
    );

    let child = command.spawn().map_err(|e| {
        Error::tool(
            operation,
            format!("failed to spawn {}: {e}", binary.display()),
        )
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(Error::tool(
                operation,
                format!("tool did not complete: {e}"),
            ));
        }
        Err(_) => {
            return Err(Error::tool(
                operation,
                format!("timed out after {}s", timeout.as_secs()),
            ));
        }
    };

    if !output.status.success() {
        return Err(Error::tool(
            operation,
            format!(
                "exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            ),
        ));
    }
    Ok(output)
}

/// Returns the last few lines of stderr for error reporting.
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "(no stderr)".to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().rev().take(8).collect();
    lines.reverse();
    lines.join("\n")
}

fn flag_with_path(flag: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(flag);
    arg.push(path.as_os_str());
    arg
}

/// Computes the total size of all files under `path`, in bytes.
///
/// # Errors
///
/// Returns an error if any directory in the tree cannot be read.
pub async fn dir_size(path: &Path) -> Result<u64> {
    let mut total = 0u64;
    let mut stack = vec![path.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
            Error::storage_with_source(format!("read directory {}", dir.display()), e)
        })?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            Error::storage_with_source(format!("read directory {}", dir.display()), e)
        })? {
            let metadata = entry.metadata().await.map_err(|e| {
                Error::storage_with_source(format!("stat {}", entry.path().display()), e)
            })?;
            if metadata.is_dir() {
                stack.push(entry.path());
            } else {
                total = total.saturating_add(metadata.len());
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<OsString> {
        vec![OsString::from("-c"), OsString::from(script)]
    }

    #[test]
    fn backup_args_for_full_backup() {
        let tool = XtrabackupTool::new("/usr/bin/xtrabackup");
        let request = BackupRequest {
            target_dir: PathBuf::from("/backups/20240108T020000Z-full"),
            incremental_base: None,
        };
        let args = tool.backup_args(&request);
        assert_eq!(
            args,
            vec![
                OsString::from("--backup"),
                OsString::from("--compress"),
                OsString::from("--target-dir=/backups/20240108T020000Z-full"),
            ]
        );
    }

    #[test]
    fn backup_args_for_incremental() {
        let tool = XtrabackupTool::new("xtrabackup").with_compression(false);
        let request = BackupRequest {
            target_dir: PathBuf::from("/backups/inc"),
            incremental_base: Some(PathBuf::from("/backups/full")),
        };
        let args = tool.backup_args(&request);
        assert_eq!(
            args,
            vec![
                OsString::from("--backup"),
                OsString::from("--target-dir=/backups/inc"),
                OsString::from("--incremental-basedir=/backups/full"),
            ]
        );
    }

    #[test]
    fn prepare_args_by_mode() {
        let tool = XtrabackupTool::new("xtrabackup");

        let redo_only = tool.prepare_args(&PrepareRequest {
            target_dir: PathBuf::from("/work/full"),
            mode: PrepareMode::RedoOnly,
            incremental_dir: None,
        });
        assert_eq!(
            redo_only,
            vec![
                OsString::from("--prepare"),
                OsString::from("--decompress"),
                OsString::from("--apply-log-only"),
                OsString::from("--target-dir=/work/full"),
            ]
        );

        let final_step = tool.prepare_args(&PrepareRequest {
            target_dir: PathBuf::from("/work/full"),
            mode: PrepareMode::RedoUndo,
            incremental_dir: Some(PathBuf::from("/backups/inc")),
        });
        assert_eq!(
            final_step,
            vec![
                OsString::from("--prepare"),
                OsString::from("--decompress"),
                OsString::from("--target-dir=/work/full"),
                OsString::from("--incremental-dir=/backups/inc"),
            ]
        );
    }

    #[test]
    fn copy_back_args_name_both_directories() {
        let tool = XtrabackupTool::new("xtrabackup");
        let args = tool.copy_back_args(Path::new("/work/full"), Path::new("/var/lib/mysql"));
        assert_eq!(
            args,
            vec![
                OsString::from("--copy-back"),
                OsString::from("--target-dir=/work/full"),
                OsString::from("--datadir=/var/lib/mysql"),
            ]
        );
    }

    #[tokio::test]
    async fn run_tool_succeeds_on_zero_exit() {
        let output = run_tool(
            Path::new("sh"),
            &sh("exit 0"),
            "backup",
            Duration::from_secs(5),
        )
        .await
        .expect("run");
        assert!(output.status.success());
    }

    #[tokio::test]
    async fn run_tool_reports_stderr_on_failure() {
        let err = run_tool(
            Path::new("sh"),
            &sh("echo boom >&2; exit 3"),
            "prepare",
            Duration::from_secs(5),
        )
        .await
        .expect_err("must fail");
        let message = err.to_string();
        assert!(message.contains("boom"), "stderr missing from: {message}");
        assert!(message.contains("prepare"));
    }

    #[tokio::test]
    async fn run_tool_times_out() {
        let err = run_tool(
            Path::new("sh"),
            &sh("sleep 5"),
            "backup",
            Duration::from_millis(50),
        )
        .await
        .expect_err("must time out");
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn dir_size_sums_nested_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.bin"), vec![0u8; 100]).expect("write");
        std::fs::create_dir(dir.path().join("nested")).expect("mkdir");
        std::fs::write(dir.path().join("nested").join("b.bin"), vec![0u8; 50]).expect("write");

        let size = dir_size(dir.path()).await.expect("size");
        assert_eq!(size, 150);
    }
}
