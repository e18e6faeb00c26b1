//! Backup identifiers.
//!
//! A [`BackupId`] is derived from the creation timestamp and backup kind,
//! rendered as `YYYYMMDD"T"HHMMSS"Z-"{full|incr}` (UTC, second precision).
//! The format is chosen so that lexicographic order equals creation order,
//! with FULL sorting before INCREMENTAL within the same second; directory
//! listings of the backup root therefore read chronologically.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::BackupKind;

/// Timestamp layout inside an identifier.
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// A stable identifier for one backup artifact.
///
/// # Example
///
/// ```rust
/// use granary_core::{BackupId, BackupKind};
///
/// let at = "2024-01-15T08:00:00Z".parse().unwrap();
/// let id = BackupId::new(BackupKind::Full, at);
/// assert_eq!(id.to_string(), "20240115T080000Z-full");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackupId {
    created_at: DateTime<Utc>,
    kind: BackupKind,
}

impl BackupId {
    /// Derives the identifier for a backup of `kind` taken at `created_at`.
    ///
    /// Sub-second precision is discarded so the identifier round-trips
    /// through its string form.
    #[must_use]
    pub fn new(kind: BackupKind, created_at: DateTime<Utc>) -> Self {
        let created_at = created_at.with_nanosecond(0).unwrap_or(created_at);
        Self { created_at, kind }
    }

    /// Returns the creation timestamp encoded in the identifier.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the backup kind encoded in the identifier.
    #[must_use]
    pub const fn kind(&self) -> BackupKind {
        self.kind
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.created_at.format(TIMESTAMP_FORMAT),
            self.kind.id_suffix()
        )
    }
}

impl FromStr for BackupId {
    type Err = ParseBackupIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let Some((stamp, suffix)) = s.rsplit_once('-') else {
            return Err(ParseBackupIdError::new(s, "missing kind suffix"));
        };

        let kind = match suffix {
            "full" => BackupKind::Full,
            "incr" => BackupKind::Incremental,
            other => {
                return Err(ParseBackupIdError::new(
                    s,
                    format!("unknown kind suffix '{other}'"),
                ));
            }
        };

        let created_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .map_err(|e| ParseBackupIdError::new(s, format!("bad timestamp: {e}")))?
            .and_utc();

        Ok(Self { created_at, kind })
    }
}

impl TryFrom<String> for BackupId {
    type Error = ParseBackupIdError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackupId> for String {
    fn from(id: BackupId) -> Self {
        id.to_string()
    }
}

/// Error produced when a string is not a valid backup identifier.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid backup id '{input}': {reason}")]
pub struct ParseBackupIdError {
    input: String,
    reason: String,
}

impl ParseBackupIdError {
    fn new(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

impl From<ParseBackupIdError> for crate::error::Error {
    fn from(err: ParseBackupIdError) -> Self {
        Self::InvalidId {
            message: err.to_string(),
        }
    }
}
