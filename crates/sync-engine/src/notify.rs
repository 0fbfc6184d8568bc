//! Escalation of anomalies to a human.

use async_trait::async_trait;
use database::{account, Database};
use tracing::{info, warn};

use crate::error::SyncError;

/// Where anomaly reports go.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), SyncError>;
}

/// Drops every report.
#[derive(Debug, Clone, Default)]
pub struct NoOpNotifier;

#[async_trait]
impl Notifier for NoOpNotifier {
    async fn notify(&self, _message: &str) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Writes reports to the log.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, message: &str) -> Result<(), SyncError> {
        warn!("Sync escalation: {}", message);
        Ok(())
    }
}

/// Chat transport that reaches role holders by session id.
#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), SyncError>;
}

/// Logs each chat message instead of delivering it, for running passes
/// without a bot connection.
#[derive(Debug, Clone, Default)]
pub struct LogChatSender;

#[async_trait]
impl ChatSender for LogChatSender {
    async fn send(&self, chat_id: &str, text: &str) -> Result<(), SyncError> {
        warn!("Escalation for chat {}: {}", chat_id, text);
        Ok(())
    }
}

/// Sends reports by chat to every reachable account holding a role.
pub struct RoleNotifier<S: ChatSender> {
    db: Database,
    role: String,
    sender: S,
}

impl<S: ChatSender> RoleNotifier<S> {
    pub fn new(db: Database, role: impl Into<String>, sender: S) -> Self {
        Self {
            db,
            role: role.into(),
            sender,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }
}

#[async_trait]
impl<S: ChatSender> Notifier for RoleNotifier<S> {
    async fn notify(&self, message: &str) -> Result<(), SyncError> {
        let recipients = account::accounts_with_role(self.db.pool(), &self.role).await?;
        if recipients.is_empty() {
            return Err(SyncError::Notify(format!(
                "no reachable account holds role '{}'",
                self.role
            )));
        }

        let mut failed = Vec::new();
        for recipient in &recipients {
            let Some(chat_id) = recipient.chat_id.as_deref() else {
                continue;
            };
            if let Err(e) = self.sender.send(chat_id, message).await {
                warn!("Failed to notify {}: {}", recipient.handle, e);
                failed.push(recipient.handle.clone());
            }
        }

        if !failed.is_empty() {
            return Err(SyncError::Notify(format!(
                "delivery failed for {}",
                failed.join(", ")
            )));
        }

        info!("Notified {} '{}' account(s)", recipients.len(), self.role);
        Ok(())
    }
}
