//! Cached reads of bot settings.

use std::sync::Arc;

use database::{setting, Database};
use tracing::warn;

use crate::cache::CacheRegistry;
use crate::error::SyncError;

/// Largest accepted `schedule_weeks_ahead`.
pub const MAX_WEEKS_AHEAD: u32 = 52;

/// Reads settings through the settings cache.
#[derive(Debug, Clone)]
pub struct SettingsReader {
    db: Database,
    caches: Arc<CacheRegistry>,
}

impl SettingsReader {
    pub fn new(db: Database, caches: Arc<CacheRegistry>) -> Self {
        Self { db, caches }
    }

    /// Raw setting value, `None` when unset.
    pub async fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        if let Some(value) = self.caches.settings().get(key).await {
            return Ok(value);
        }

        let value = setting::get_setting(self.db.pool(), key)
            .await?
            .map(|s| s.value);
        self.caches.settings().insert(key, value.clone()).await;
        Ok(value)
    }

    /// Weeks ahead of the current one covered by the schedule table.
    /// Falls back to `default` when unset, unparseable or above
    /// [`MAX_WEEKS_AHEAD`].
    pub async fn weeks_ahead(&self, default: u32) -> Result<u32, SyncError> {
        let Some(raw) = self.get(setting::SCHEDULE_WEEKS_AHEAD).await? else {
            return Ok(default);
        };

        match raw.trim().parse::<u32>() {
            Ok(weeks) if weeks <= MAX_WEEKS_AHEAD => Ok(weeks),
            _ => {
                warn!(
                    "Ignoring {}='{}', using {}",
                    setting::SCHEDULE_WEEKS_AHEAD,
                    raw,
                    default
                );
                Ok(default)
            }
        }
    }
}
