//! Read caches in front of the database and their invalidation.
//!
//! Bot features look up permissions and settings on every message. Those
//! lookups go through short-lived caches that a reconciliation pass clears
//! once it has committed new data.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tokio::sync::RwLock;
use tracing::debug;

/// Upper bound on entries per cache.
const MAX_CACHE_ENTRIES: u64 = 10_000;

/// Bounded in-memory cache with one TTL for all entries.
pub struct TtlCache<V> {
    cache: Cache<String, V>,
    ttl: Duration,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, MAX_CACHE_ENTRIES)
    }

    pub fn with_capacity(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache, ttl }
    }

    /// Cached value, if present and not expired.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.cache.get(key).await
    }

    pub async fn insert(&self, key: impl Into<String>, value: V) {
        self.cache.insert(key.into(), value).await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Live entries once pending evictions have run.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Which cached data went stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheScope {
    /// Roles by chat session.
    Permissions,
    /// Bot settings.
    Settings,
    /// Everything.
    All,
}

impl CacheScope {
    fn covers(&self, other: CacheScope) -> bool {
        *self == CacheScope::All || *self == other
    }
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheScope::Permissions => write!(f, "permissions"),
            CacheScope::Settings => write!(f, "settings"),
            CacheScope::All => write!(f, "all"),
        }
    }
}

/// Something holding cached data that a pass can make stale.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, scope: CacheScope);
}

/// The bot's shared caches, plus any extra listeners that want to hear
/// about invalidations.
pub struct CacheRegistry {
    permissions: TtlCache<BTreeSet<String>>,
    settings: TtlCache<Option<String>>,
    listeners: RwLock<Vec<Arc<dyn CacheInvalidator>>>,
}

impl CacheRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            permissions: TtlCache::new(ttl),
            settings: TtlCache::new(ttl),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Roles by chat id.
    pub fn permissions(&self) -> &TtlCache<BTreeSet<String>> {
        &self.permissions
    }

    /// Setting values by key (`None` caches "not set").
    pub fn settings(&self) -> &TtlCache<Option<String>> {
        &self.settings
    }

    /// Forward future invalidations to `listener`.
    pub async fn subscribe(&self, listener: Arc<dyn CacheInvalidator>) {
        self.listeners.write().await.push(listener);
    }
}

impl fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRegistry").finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheInvalidator for CacheRegistry {
    async fn invalidate(&self, scope: CacheScope) {
        if scope.covers(CacheScope::Permissions) {
            self.permissions.clear();
        }
        if scope.covers(CacheScope::Settings) {
            self.settings.clear();
        }

        let listeners = self.listeners.read().await.clone();
        for listener in listeners {
            listener.invalidate(scope).await;
        }
        debug!("Invalidated {} caches", scope);
    }
}
