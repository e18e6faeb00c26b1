//! Cluster-wide advisory backup lock.
//!
//! One backup, prepare, restore, or rotate operation may run cluster-wide
//! at a time. Coordination happens through a lock file on the shared
//! backup storage root:
//!
//! - **CAS acquisition**: the lock file is created with `create_new`, so
//!   only one writer can succeed
//! - **TTL**: an expiry timestamp inside the file prevents a crashed
//!   holder from blocking the cluster forever
//! - **Stale takeover**: an expired or unreadable lock file is renamed
//!   aside before re-acquisition; the rename succeeds for exactly one
//!   contender
//! - **Retry with backoff**: acquisition retries until a configured
//!   deadline, then fails with a retryable timeout error
//!
//! # Example
//!
//! ```rust,ignore
//! let lock = ClusterLock::new(layout.lock_path());
//!
//! let guard = lock
//!     .acquire(Duration::from_secs(4 * 3600), Duration::from_secs(300))
//!     .await?;
//!
//! // Critical section: only one holder cluster-wide.
//!
//! guard.release().await?;
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use ulid::Ulid;

use crate::error::{Error, Result};

/// Default lock TTL. Generous because a physical backup can run for hours.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(4 * 3600);

/// Default acquisition deadline.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// Base backoff duration for retries.
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Maximum backoff duration.
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Lock file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    /// Unique lock holder ID.
    pub holder_id: String,

    /// When the lock expires.
    pub expires_at: DateTime<Utc>,

    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,

    /// Optional description of the operation holding the lock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl LockInfo {
    /// Creates a new lock info with the given holder ID and TTL.
    #[must_use]
    pub fn new(holder_id: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            holder_id: holder_id.into(),
            expires_at: now
                + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(4)),
            acquired_at: now,
            operation: None,
        }
    }

    /// Returns whether this lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Returns the remaining TTL, or zero if expired.
    #[must_use]
    pub fn remaining_ttl(&self) -> Duration {
        let remaining = self.expires_at - Utc::now();
        let millis = remaining.num_milliseconds();
        if millis <= 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
        }
    }
}

/// The cluster-wide backup lock, backed by a file on shared storage.
#[derive(Debug, Clone)]
pub struct ClusterLock {
    path: PathBuf,
    holder_id: String,
}

impl ClusterLock {
    /// Creates a new lock handle for the given lock file path.
    ///
    /// Each handle gets a unique holder ID for identification.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            holder_id: Ulid::new().to_string(),
        }
    }

    /// Returns the holder ID for this lock handle.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Attempts to acquire the lock, retrying until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] if the lock is still held when the
    /// deadline passes; no state has been mutated in that case.
    pub async fn acquire(&self, ttl: Duration, timeout: Duration) -> Result<LockGuard> {
        self.acquire_with_operation(ttl, timeout, None).await
    }

    /// Attempts to acquire the lock with an operation description.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] if the deadline passes first.
    pub async fn acquire_with_operation(
        &self,
        ttl: Duration,
        timeout: Duration,
        operation: Option<String>,
    ) -> Result<LockGuard> {
        let start = Instant::now();
        let mut backoff = BACKOFF_BASE;

        loop {
            match self.try_acquire(ttl, operation.clone()).await {
                Ok(guard) => {
                    tracing::debug!(
                        holder = %self.holder_id,
                        path = %self.path.display(),
                        "cluster lock acquired"
                    );
                    return Ok(guard);
                }
                Err(LockError::Held(holder)) => {
                    if start.elapsed() >= timeout {
                        return Err(Error::lock_timeout(start.elapsed(), holder));
                    }

                    // Exponential backoff with jitter, capped at the deadline.
                    let jitter = Duration::from_millis(rand_jitter());
                    let delay = (backoff.min(BACKOFF_MAX) + jitter)
                        .min(timeout.saturating_sub(start.elapsed()));
                    tokio::time::sleep(delay).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(LockError::Storage(e)) => return Err(e),
            }
        }
    }

    /// Attempts to acquire the lock once (no retries).
    async fn try_acquire(
        &self,
        ttl: Duration,
        operation: Option<String>,
    ) -> std::result::Result<LockGuard, LockError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                LockError::Storage(Error::storage_with_source(
                    format!("create lock directory {}", parent.display()),
                    e,
                ))
            })?;
        }

        let mut info = LockInfo::new(&self.holder_id, ttl);
        info.operation = operation;
        let bytes = serde_json::to_vec(&info)
            .map_err(|e| LockError::Storage(Error::serialization(format!("encode lock: {e}"))))?;

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(mut file) => {
                let write = async {
                    file.write_all(&bytes).await?;
                    file.flush().await
                };
                write.await.map_err(|e| {
                    LockError::Storage(Error::storage_with_source(
                        format!("write lock {}", self.path.display()),
                        e,
                    ))
                })?;
                return Ok(LockGuard {
                    path: self.path.clone(),
                    holder_id: self.holder_id.clone(),
                    released: false,
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // Lock exists; check whether it can be taken over.
            }
            Err(e) => {
                return Err(LockError::Storage(Error::storage_with_source(
                    format!("create lock {}", self.path.display()),
                    e,
                )));
            }
        }

        match read_info(&self.path).await.map_err(LockError::Storage)? {
            Some(info) if !info.is_expired() => Err(LockError::Held(info.holder_id)),
            other => {
                // Expired, unreadable, or vanished: move it aside so the
                // next attempt races cleanly on create_new. The rename
                // succeeds for exactly one contender.
                let holder = other.map_or_else(|| "unknown".to_string(), |i| i.holder_id);
                self.break_stale().await.map_err(LockError::Storage)?;
                Err(LockError::Held(holder))
            }
        }
    }

    /// Renames a stale lock file aside and removes it.
    async fn break_stale(&self) -> Result<()> {
        let aside = self.path.with_extension(format!("stale-{}", self.holder_id));
        match tokio::fs::rename(&self.path, &aside).await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(&aside).await;
                Ok(())
            }
            // Another contender already broke it.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage_with_source(
                format!("break stale lock {}", self.path.display()),
                e,
            )),
        }
    }

    /// Forcefully breaks an existing lock (admin operation).
    ///
    /// # Warning
    ///
    /// Only for recovery when a lock is known to be stale but has not
    /// expired (e.g. a crashed holder with a long TTL).
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file could not be removed.
    pub async fn force_break(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage_with_source(
                format!("remove lock {}", self.path.display()),
                e,
            )),
        }
    }

    /// Checks if the lock is currently held (regardless of holder).
    ///
    /// # Errors
    ///
    /// Returns an error if the lock state could not be read.
    pub async fn is_locked(&self) -> Result<bool> {
        Ok(read_info(&self.path)
            .await?
            .is_some_and(|info| !info.is_expired()))
    }
}

/// RAII guard for a held lock.
///
/// Released on drop as a fallback; prefer calling [`LockGuard::release`]
/// explicitly so release errors are observable.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    holder_id: String,
    released: bool,
}

impl LockGuard {
    /// Returns the holder ID for this lock.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Explicitly releases the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file could not be read or removed.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;

        // Only release if we still own it; an expired lock may have been
        // taken over by another holder in the meantime.
        if let Some(info) = read_info(&self.path).await? {
            if info.holder_id == self.holder_id {
                match tokio::fs::remove_file(&self.path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(Error::storage_with_source(
                            format!("release lock {}", self.path.display()),
                            e,
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Best-effort synchronous release in the destructor. Works outside
        // a runtime, which matters during unwinds.
        if let Ok(data) = std::fs::read(&self.path) {
            if let Ok(info) = serde_json::from_slice::<LockInfo>(&data) {
                if info.holder_id == self.holder_id {
                    let _ = std::fs::remove_file(&self.path);
                }
            }
        }
    }
}

/// Reads the current lock info, if any.
///
/// An unreadable lock file is reported as absent (and logged); treating
/// partial writes from a crashed holder as permanent would wedge the
/// cluster until an operator intervened.
async fn read_info(path: &Path) -> Result<Option<LockInfo>> {
    match tokio::fs::read(path).await {
        Ok(data) => match serde_json::from_slice::<LockInfo>(&data) {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "unreadable lock file, treating as stale"
                );
                Ok(None)
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::storage_with_source(
            format!("read lock {}", path.display()),
            e,
        )),
    }
}

/// Internal lock acquisition errors.
enum LockError {
    Held(String),
    Storage(Error),
}

/// Generates random jitter for backoff (0-50ms).
fn rand_jitter() -> u64 {
    use std::time::SystemTime;
    let seed = u64::from(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    );
    seed % 50
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("locks").join("cluster.lock.json")
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = ClusterLock::new(lock_path(&dir));

        let guard = lock
            .acquire(Duration::from_secs(30), Duration::from_secs(1))
            .await
            .expect("acquire");
        assert!(!guard.holder_id().is_empty());
        assert!(lock.is_locked().await.expect("check"));

        guard.release().await.expect("release");
        assert!(!lock.is_locked().await.expect("check"));
    }

    #[tokio::test]
    async fn held_lock_times_out_second_holder() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock1 = ClusterLock::new(lock_path(&dir));
        let lock2 = ClusterLock::new(lock_path(&dir));

        let _guard = lock1
            .acquire(Duration::from_secs(30), Duration::from_secs(1))
            .await
            .expect("acquire1");

        let err = lock2
            .acquire(Duration::from_secs(30), Duration::from_millis(50))
            .await
            .expect_err("second acquisition must fail");
        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn zero_timeout_fails_immediately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock1 = ClusterLock::new(lock_path(&dir));
        let lock2 = ClusterLock::new(lock_path(&dir));

        let _guard = lock1
            .acquire(Duration::from_secs(30), Duration::from_secs(1))
            .await
            .expect("acquire1");

        let err = lock2
            .acquire(Duration::from_secs(30), Duration::ZERO)
            .await
            .expect_err("must not wait");
        assert!(matches!(err, Error::LockTimeout { .. }));
    }

    #[tokio::test]
    async fn expired_lock_is_taken_over() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock1 = ClusterLock::new(lock_path(&dir));
        let lock2 = ClusterLock::new(lock_path(&dir));

        let guard1 = lock1
            .acquire(Duration::from_millis(1), Duration::from_secs(1))
            .await
            .expect("acquire1");

        tokio::time::sleep(Duration::from_millis(10)).await;

        let guard2 = lock2
            .acquire(Duration::from_secs(30), Duration::from_secs(2))
            .await
            .expect("acquire2");
        assert_ne!(guard1.holder_id(), guard2.holder_id());

        guard2.release().await.expect("release2");
    }

    #[tokio::test]
    async fn drop_releases_as_fallback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = ClusterLock::new(lock_path(&dir));

        {
            let _guard = lock
                .acquire(Duration::from_secs(30), Duration::from_secs(1))
                .await
                .expect("acquire");
            assert!(lock.is_locked().await.expect("check"));
        }

        assert!(!lock.is_locked().await.expect("released on drop"));
    }

    #[tokio::test]
    async fn operation_is_recorded_in_lock_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = ClusterLock::new(lock_path(&dir));

        let guard = lock
            .acquire_with_operation(
                Duration::from_secs(30),
                Duration::from_secs(1),
                Some("rotate".into()),
            )
            .await
            .expect("acquire");

        let data = std::fs::read(lock_path(&dir)).expect("read lock file");
        let info: LockInfo = serde_json::from_slice(&data).expect("parse");
        assert_eq!(info.operation.as_deref(), Some("rotate"));
        assert_eq!(info.holder_id, guard.holder_id());

        guard.release().await.expect("release");
    }

    #[tokio::test]
    async fn force_break_removes_valid_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lock = ClusterLock::new(lock_path(&dir));

        let _guard = lock
            .acquire(Duration::from_secs(30), Duration::from_secs(1))
            .await
            .expect("acquire");
        assert!(lock.is_locked().await.expect("check"));

        lock.force_break().await.expect("break");
        assert!(!lock.is_locked().await.expect("check"));
    }

    #[test]
    fn lock_info_expiry() {
        let info = LockInfo::new("holder-1", Duration::from_secs(60));
        assert!(!info.is_expired());
        assert!(info.remaining_ttl() > Duration::ZERO);

        let expired = LockInfo {
            holder_id: "holder-2".into(),
            expires_at: Utc::now() - chrono::Duration::seconds(10),
            acquired_at: Utc::now() - chrono::Duration::seconds(20),
            operation: None,
        };
        assert!(expired.is_expired());
        assert_eq!(expired.remaining_ttl(), Duration::ZERO);
    }

    #[tokio::test]
    async fn unreadable_lock_file_is_treated_as_stale() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = lock_path(&dir);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, b"not json").expect("write garbage");

        let lock = ClusterLock::new(&path);
        assert!(!lock.is_locked().await.expect("read"));

        let guard = lock
            .acquire(Duration::from_secs(30), Duration::from_secs(2))
            .await
            .expect("acquire over garbage");
        guard.release().await.expect("release");
    }
}
