//! Operator notifications.
//!
//! Lifecycle operations report noteworthy outcomes (failures, blocked
//! rotations, orphaned backups) through the [`Notifier`] trait. Delivery
//! failures are logged by callers but never fail the operation that
//! produced the notification.
//!
//! Two implementations ship: [`LogNotifier`] writes through the tracing
//! pipeline, [`MailCommandNotifier`] pipes an RFC 822 style message into
//! a local mailer command (sendmail compatible).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};

/// Timeout for handing a message to the local mailer.
const MAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Routine outcome worth recording.
    Info,

    /// Something an operator should look at soon.
    Warning,

    /// Something an operator must act on.
    Critical,
}

impl Severity {
    /// Returns a label for logging and message subjects.
    #[must_use]
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A message for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// How urgent the message is.
    pub severity: Severity,

    /// Short subject line.
    pub subject: String,

    /// Message body.
    pub body: String,
}

impl Notification {
    /// Creates a new notification.
    #[must_use]
    pub fn new(severity: Severity, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            severity,
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Delivery channel for operator notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one notification.
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that writes through the tracing pipeline.
///
/// The default channel when no mail destination is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        match notification.severity {
            Severity::Info => {
                tracing::info!(subject = %notification.subject, "{}", notification.body);
            }
            Severity::Warning => {
                tracing::warn!(subject = %notification.subject, "{}", notification.body);
            }
            Severity::Critical => {
                tracing::error!(subject = %notification.subject, "{}", notification.body);
            }
        }
        Ok(())
    }
}

/// Notifier that pipes messages into a sendmail-compatible command.
///
/// The command is invoked with `-t` so recipients are read from the
/// message headers.
#[derive(Debug, Clone)]
pub struct MailCommandNotifier {
    command: PathBuf,
    to: String,
    from: String,
}

impl MailCommandNotifier {
    /// Creates a notifier for the given mailer command and addresses.
    #[must_use]
    pub fn new(command: impl Into<PathBuf>, to: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            to: to.into(),
            from: from.into(),
        }
    }

    /// Renders the full message, headers included.
    #[must_use]
    pub fn render(&self, notification: &Notification) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: [{}] {}\n\n{}\n",
            self.from,
            self.to,
            notification.severity.as_label(),
            notification.subject,
            notification.body
        )
    }
}

#[async_trait]
impl Notifier for MailCommandNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let message = self.render(notification);

        let mut child = Command::new(&self.command)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::tool(
                    "notify",
                    format!("failed to spawn {}: {e}", self.command.display()),
                )
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(message.as_bytes())
                .await
                .map_err(|e| Error::tool("notify", format!("write to mailer: {e}")))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| Error::tool("notify", format!("close mailer stdin: {e}")))?;
        }

        let output = match tokio::time::timeout(MAIL_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::tool("notify", format!("mailer did not complete: {e}")));
            }
            Err(_) => {
                return Err(Error::tool(
                    "notify",
                    format!("mailer timed out after {}s", MAIL_TIMEOUT.as_secs()),
                ));
            }
        };

        if !output.status.success() {
            return Err(Error::tool(
                "notify",
                format!(
                    "mailer exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        tracing::debug!(
            severity = %notification.severity,
            subject = %notification.subject,
            "notification mailed"
        );
        Ok(())
    }
}
