//! Role checks for chat sessions.

use std::collections::BTreeSet;
use std::sync::Arc;

use database::{account, Database};

use crate::cache::CacheRegistry;
use crate::error::SyncError;

/// Answers "does this chat hold that role" through the permission cache.
#[derive(Debug, Clone)]
pub struct PermissionChecker {
    db: Database,
    caches: Arc<CacheRegistry>,
}

impl PermissionChecker {
    pub fn new(db: Database, caches: Arc<CacheRegistry>) -> Self {
        Self { db, caches }
    }

    /// Roles of the live account bound to `chat_id` (empty when none).
    pub async fn roles(&self, chat_id: &str) -> Result<BTreeSet<String>, SyncError> {
        if let Some(roles) = self.caches.permissions().get(chat_id).await {
            return Ok(roles);
        }

        let roles = account::roles_for_chat(self.db.pool(), chat_id).await?;
        self.caches.permissions().insert(chat_id, roles.clone()).await;
        Ok(roles)
    }

    pub async fn has_role(&self, chat_id: &str, role: &str) -> Result<bool, SyncError> {
        Ok(self.roles(chat_id).await?.contains(role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheInvalidator, CacheScope};
    use database::Account;
    use std::time::Duration;

    #[tokio::test]
    async fn test_roles_are_cached_until_invalidated() {
        let db = Database::connect_with_pool_size("sqlite::memory:", 1)
            .await
            .unwrap();
        db.migrate().await.unwrap();

        let mut tutor = Account::new("tina", "Tina");
        tutor.secret = Some("t1".to_string());
        tutor.roles.insert("tutor".to_string());
        account::create_account(db.pool(), &tutor).await.unwrap();
        let tutor = account::authenticate(db.pool(), "t1", "chat-tina").await.unwrap();

        let caches = Arc::new(CacheRegistry::new(Duration::from_secs(300)));
        let checker = PermissionChecker::new(db.clone(), caches.clone());

        assert!(checker.has_role("chat-tina", "tutor").await.unwrap());
        assert!(!checker.has_role("chat-unknown", "tutor").await.unwrap());

        let mut promoted = tutor.clone();
        promoted.roles.insert("admin".to_string());
        account::update_account(db.pool(), &promoted).await.unwrap();

        // Still served from the cache.
        assert!(!checker.has_role("chat-tina", "admin").await.unwrap());

        caches.invalidate(CacheScope::Permissions).await;
        assert!(checker.has_role("chat-tina", "admin").await.unwrap());
    }
}
