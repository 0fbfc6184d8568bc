//! Per-kind adapters plugged into the generic merge.
//!
//! Each entity kind supplies its key, its row parser and the field copies in
//! both directions; the merge algorithm itself lives in [`crate::merge`].

pub mod accounts;
pub mod events;
pub mod templates;

pub use accounts::Accounts;
pub use events::{row_starts_at, Events};
pub use templates::Templates;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use database::LifecycleState;
use sqlx::SqliteConnection;

use crate::anomaly::AnomalyKind;
use crate::keys::RecordKey;
use crate::owners::OwnerIndex;
use crate::row::{Domain, Row};

/// Typed adapter for one entity kind.
pub trait SyncKind {
    /// Stored record type.
    type Record: Clone + fmt::Debug + Send + Sync;

    /// Table the kind is synced with.
    const DOMAIN: Domain;

    /// Identity of a stored record.
    fn record_key(record: &Self::Record) -> RecordKey;

    /// Identity of a table row. Total: malformed rows still get a key.
    fn row_key(row: &Row) -> RecordKey;

    fn state(record: &Self::Record) -> LifecycleState;

    fn set_state(record: &mut Self::Record, state: LifecycleState);

    /// Owner handle of a stored record, for kinds that have one.
    fn record_owner(_record: &Self::Record) -> Option<&str> {
        None
    }

    /// Parse and validate a row into a fresh `Active` record.
    fn construct(row: &Row, owners: &OwnerIndex) -> Result<Self::Record, AnomalyKind>;

    /// Copy the operator-editable fields of `incoming` onto `record`.
    /// Returns whether anything changed.
    fn adopt_fields(record: &mut Self::Record, incoming: &Self::Record) -> bool;

    /// Write the record's fields into a row, keeping unrelated cells.
    fn copy_record_fields(row: &mut Row, record: &Self::Record);

    /// Sort key giving the table's display order.
    fn display_order(row: &Row) -> String;

    /// Problems that only show up across rows (e.g. shared secrets), by row
    /// position.
    fn cross_row_anomalies(_rows: &[Row]) -> BTreeMap<usize, AnomalyKind> {
        BTreeMap::new()
    }
}

/// Revision-guarded writes of one kind inside the reconciliation transaction.
#[async_trait]
pub trait Persist: SyncKind {
    async fn insert(conn: &mut SqliteConnection, record: &Self::Record) -> database::Result<i64>;

    /// False when the record changed since it was pulled.
    async fn update(conn: &mut SqliteConnection, record: &Self::Record) -> database::Result<bool>;

    /// False when the record changed since it was pulled.
    async fn purge(conn: &mut SqliteConnection, record: &Self::Record) -> database::Result<bool>;

    /// False when the record changed since it was pulled.
    async fn confirm(conn: &mut SqliteConnection, record: &Self::Record) -> database::Result<bool>;
}

/// Sort rows into display order; identical orders fall back to cell content.
pub fn sort_rows<K: SyncKind>(rows: &mut [Row]) {
    rows.sort_by(|a, b| {
        K::display_order(a)
            .cmp(&K::display_order(b))
            .then_with(|| a.cmp(b))
    });
}

fn malformed(reason: impl fmt::Display) -> AnomalyKind {
    AnomalyKind::MalformedRow {
        reason: reason.to_string(),
    }
}
