//! Error types for reconciliation passes.
//!
//! Anything returned as an error fails the whole pass before the internal
//! commit (or before the confirm step). Record-level problems are reported as
//! [`Anomaly`](crate::Anomaly) values instead.

use std::time::Duration;

use database::DatabaseError;
use thiserror::Error;

use crate::row::Domain;

/// Errors that can occur during a reconciliation pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Internal store failure (connection, query, transaction).
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Table store file access failed.
    #[error("table I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Table store content could not be decoded or encoded.
    #[error("table JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Table store unreachable or refused the request.
    #[error("table store unavailable: {0}")]
    Store(String),

    /// Two internal records claim the same identity.
    #[error("duplicate {domain} key in internal store: {key}")]
    DuplicateKey { domain: Domain, key: String },

    /// Another pass holds the single-flight guard.
    #[error("a reconciliation pass is already running")]
    PassInProgress,

    /// The pass did not finish in time.
    #[error("reconciliation pass timed out after {0:?}")]
    Timeout(Duration),

    /// Escalation could not be delivered.
    #[error("notification failed: {0}")]
    Notify(String),

    /// Chat message sending failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Database(DatabaseError::Sqlx(e))
    }
}
