//! Applying merge results to the internal store.

use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::kinds::Persist;
use crate::merge::MergeResult;

/// Counters for one domain of a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub confirmed: usize,
    /// Writes skipped because the bot edited the record mid-pass.
    pub stale: usize,
    pub anomalies: usize,
    /// Rows written to the table (0 when the table was left untouched).
    pub rows_written: usize,
}

impl DomainStats {
    /// Whether anything changed on either side.
    pub fn changed(&self) -> bool {
        self.inserted + self.updated + self.deleted + self.confirmed + self.rows_written > 0
    }
}

/// Apply inserts, updates and purges of kind `K` inside the pass transaction.
///
/// Revision-guarded writes that hit a record edited since the snapshot are
/// skipped; the next pass sees the newer revision.
pub async fn apply<K: Persist>(
    conn: &mut SqliteConnection,
    merged: &MergeResult<K::Record>,
) -> Result<DomainStats, SyncError> {
    let mut stats = DomainStats {
        anomalies: merged.anomalies.len(),
        ..DomainStats::default()
    };

    for record in &merged.inserts {
        let id = K::insert(conn, record).await?;
        debug!("[{}] inserted {} as {}", K::DOMAIN, K::record_key(record), id);
        stats.inserted += 1;
    }

    for record in &merged.updates {
        if K::update(conn, record).await? {
            stats.updated += 1;
        } else {
            warn!("[{}] {} changed during the pass, update skipped", K::DOMAIN, K::record_key(record));
            stats.stale += 1;
        }
    }

    for record in &merged.deletes {
        if K::purge(conn, record).await? {
            debug!("[{}] purged {} ({})", K::DOMAIN, K::record_key(record), K::state(record));
            stats.deleted += 1;
        } else {
            warn!("[{}] {} changed during the pass, purge skipped", K::DOMAIN, K::record_key(record));
            stats.stale += 1;
        }
    }

    Ok(stats)
}

/// Flip records pushed to the table to `Active`.
pub async fn confirm<K: Persist>(
    conn: &mut SqliteConnection,
    merged: &MergeResult<K::Record>,
    stats: &mut DomainStats,
) -> Result<(), SyncError> {
    for record in &merged.confirms {
        if K::confirm(conn, record).await? {
            stats.confirmed += 1;
        } else {
            // Edited again since the snapshot: stays PendingPush for the next pass.
            debug!("[{}] {} not confirmed, newer revision", K::DOMAIN, K::record_key(record));
            stats.stale += 1;
        }
    }
    Ok(())
}
