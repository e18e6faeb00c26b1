//! Settings file loading and wiring.
//!
//! One TOML file describes a deployment: where the database lives, where
//! backups go, how long they are kept, and who gets told when something
//! goes wrong. [`load`] parses and validates it; the builder methods on
//! [`Settings`] turn it into a ready [`Orchestrator`].
//!
//! ```toml
//! [cluster]
//! data_dir = "/var/lib/mysql"
//!
//! [storage]
//! backup_root = "/backups/granary"
//!
//! [rotation]
//! daily_count = 7
//! weekly_count = 4
//!
//! [notify]
//! email_to = "dba@example.com"
//! email_from = "granary@db01.example.com"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use granary_catalog::{Orchestrator, OrchestratorConfig, PrepareOptions, RotationPolicy};
use granary_core::{
    LogNotifier, MailCommandNotifier, Notifier, XtrabackupTool, DEFAULT_LOCK_TIMEOUT,
    DEFAULT_LOCK_TTL, DEFAULT_TOOL_TIMEOUT,
};
use serde::Deserialize;

/// Everything a granary deployment is configured with.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// The database cluster being backed up.
    pub cluster: ClusterSettings,

    /// Where backups live.
    pub storage: StorageSettings,

    /// Retention policy.
    #[serde(default)]
    pub rotation: RotationPolicy,

    /// Cluster lock tuning.
    #[serde(default)]
    pub lock: LockSettings,

    /// Operator notification channel.
    #[serde(default)]
    pub notify: NotifySettings,
}

/// The `[cluster]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSettings {
    /// The database data directory restores write into.
    pub data_dir: PathBuf,

    /// Path to the xtrabackup binary.
    #[serde(default = "default_xtrabackup_path")]
    pub xtrabackup_path: PathBuf,

    /// Compress artifacts as they are taken.
    #[serde(default = "default_true")]
    pub compress: bool,

    /// Upper bound on any single tool invocation, in seconds.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

/// The `[storage]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// The shared backup root directory.
    pub backup_root: PathBuf,

    /// Prepare against the artifact itself instead of a staged copy.
    #[serde(default)]
    pub prepare_in_place: bool,
}

/// The `[lock]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// How long to wait for the cluster lock, in seconds.
    pub timeout_secs: u64,

    /// TTL written into the lock, in seconds.
    pub ttl_secs: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_LOCK_TIMEOUT.as_secs(),
            ttl_secs: DEFAULT_LOCK_TTL.as_secs(),
        }
    }
}

/// The `[notify]` section.
///
/// With both addresses set, notifications go out through the mailer
/// command; otherwise they land in the logs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifySettings {
    /// Recipient address.
    pub email_to: Option<String>,

    /// Sender address.
    pub email_from: Option<String>,

    /// Sendmail-compatible mailer command.
    pub mailer_command: PathBuf,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            email_to: None,
            email_from: None,
            mailer_command: PathBuf::from("/usr/sbin/sendmail"),
        }
    }
}

fn default_xtrabackup_path() -> PathBuf {
    PathBuf::from("xtrabackup")
}

fn default_true() -> bool {
    true
}

fn default_tool_timeout_secs() -> u64 {
    DEFAULT_TOOL_TIMEOUT.as_secs()
}

/// Reads and validates the settings file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, or
/// fails validation.
pub fn load(path: &Path) -> anyhow::Result<Settings> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read settings file {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&raw).with_context(|| format!("parse settings file {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

impl Settings {
    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending section.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(problem) = self.rotation.validate() {
            anyhow::bail!("invalid [rotation] settings: {problem}");
        }
        if self.notify.email_to.is_some() != self.notify.email_from.is_some() {
            anyhow::bail!("[notify] needs both email_to and email_from, or neither");
        }
        if self.lock.ttl_secs == 0 {
            anyhow::bail!("[lock] ttl_secs must be positive");
        }
        Ok(())
    }

    /// Builds the xtrabackup wrapper these settings describe.
    #[must_use]
    pub fn build_tool(&self) -> XtrabackupTool {
        XtrabackupTool::new(&self.cluster.xtrabackup_path)
            .with_compression(self.cluster.compress)
            .with_timeout(Duration::from_secs(self.cluster.tool_timeout_secs))
    }

    /// Builds the notification channel these settings describe.
    #[must_use]
    pub fn build_notifier(&self) -> Arc<dyn Notifier> {
        match (&self.notify.email_to, &self.notify.email_from) {
            (Some(to), Some(from)) => Arc::new(MailCommandNotifier::new(
                &self.notify.mailer_command,
                to,
                from,
            )),
            _ => Arc::new(LogNotifier),
        }
    }

    /// Builds a ready orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> Orchestrator {
        let config = OrchestratorConfig {
            backup_root: self.storage.backup_root.clone(),
            data_dir: self.cluster.data_dir.clone(),
            policy: self.rotation.clone(),
            prepare: PrepareOptions {
                in_place: self.storage.prepare_in_place,
            },
            lock_ttl: Duration::from_secs(self.lock.ttl_secs),
            lock_timeout: Duration::from_secs(self.lock.timeout_secs),
        };
        Orchestrator::new(config, Arc::new(self.build_tool()), self.build_notifier())
    }
}
