//! A notifier that records messages instead of delivering them.

use std::sync::Mutex;

use async_trait::async_trait;
use granary_core::{Notification, Notifier, Result, Severity};

/// Captures notifications for later assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all captured notifications in delivery order.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// Returns the captured subject lines in delivery order.
    pub fn subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.subject).collect()
    }

    /// Returns captured notifications at the given severity.
    pub fn at_severity(&self, severity: Severity) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| n.severity == severity)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
