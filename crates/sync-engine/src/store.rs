//! Operator table stores.
//!
//! A store hands out full snapshots of a table and accepts full snapshots
//! back. Writes replace the whole table, so repeating one is harmless.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::SyncError;
use crate::row::{Domain, Row};

/// The operator-edited side of the reconciliation.
#[async_trait]
pub trait ExternalStore: Send + Sync {
    /// Read every row of a table.
    async fn read_rows(&self, domain: Domain) -> Result<Vec<Row>, SyncError>;

    /// Replace a table's content.
    async fn write_rows(&self, domain: Domain, rows: &[Row]) -> Result<(), SyncError>;
}

#[async_trait]
impl<T: ExternalStore + ?Sized> ExternalStore for Arc<T> {
    async fn read_rows(&self, domain: Domain) -> Result<Vec<Row>, SyncError> {
        (**self).read_rows(domain).await
    }

    async fn write_rows(&self, domain: Domain, rows: &[Row]) -> Result<(), SyncError> {
        (**self).write_rows(domain, rows).await
    }
}

/// In-process tables, for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: RwLock<BTreeMap<Domain, Vec<Row>>>,
    writes: AtomicUsize,
    unavailable: AtomicBool,
    reject_writes: AtomicBool,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a table as the operator would, without counting a write.
    pub async fn set_rows(&self, domain: Domain, rows: Vec<Row>) {
        self.tables.write().await.insert(domain, rows);
    }

    /// Current content of a table.
    pub async fn rows(&self, domain: Domain) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(&domain)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of table writes made through [`ExternalStore::write_rows`].
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make writes fail while reads still succeed.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), SyncError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::Store("memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalStore for MemoryTableStore {
    async fn read_rows(&self, domain: Domain) -> Result<Vec<Row>, SyncError> {
        self.check_available()?;
        Ok(self.rows(domain).await)
    }

    async fn write_rows(&self, domain: Domain, rows: &[Row]) -> Result<(), SyncError> {
        self.check_available()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Store(format!("write to {} rejected", domain)));
        }
        self.tables.write().await.insert(domain, rows.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Tables kept as one JSON array of flat objects per domain, e.g.
/// `tables/accounts.json`. Missing files read as empty tables.
#[derive(Debug, Clone)]
pub struct JsonTableStore {
    dir: PathBuf,
}

impl JsonTableStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing a table.
    pub fn path(&self, domain: Domain) -> PathBuf {
        self.dir.join(format!("{}.json", domain.as_str()))
    }
}

#[async_trait]
impl ExternalStore for JsonTableStore {
    async fn read_rows(&self, domain: Domain) -> Result<Vec<Row>, SyncError> {
        let path = self.path(domain);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} does not exist, treating as empty", path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn write_rows(&self, domain: Domain, rows: &[Row]) -> Result<(), SyncError> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.path(domain);
        let tmp = self.dir.join(format!(".{}.json.tmp", domain.as_str()));
        let json = serde_json::to_string_pretty(rows)?;

        // Readers never see a half-written table.
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;

        debug!("Wrote {} rows to {}", rows.len(), path.display());
        Ok(())
    }
}
