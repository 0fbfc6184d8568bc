//! Records that cannot be merged this pass.
//!
//! An anomaly keeps its row and its internal counterpart out of the merge,
//! gets escalated to a human, and is retried on the next pass.

use std::fmt;

use crate::keys::RecordKey;
use crate::row::Domain;

/// Why a record was held back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnomalyKind {
    /// The referenced owner handle is not a known account.
    UnknownOwner { handle: String },
    /// A cell is missing or cannot be parsed.
    MalformedRow { reason: String },
    /// Several rows share one key.
    DuplicateRow { count: usize },
    /// Several accounts share one registration secret.
    DuplicateSecret { handles: Vec<String> },
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyKind::UnknownOwner { handle } if handle.is_empty() => {
                write!(f, "row has no owner")
            }
            AnomalyKind::UnknownOwner { handle } => {
                write!(f, "owner '{}' is not in the accounts table (typo?)", handle)
            }
            AnomalyKind::MalformedRow { reason } => write!(f, "malformed row: {}", reason),
            AnomalyKind::DuplicateRow { count } => {
                write!(f, "{} rows describe the same record", count)
            }
            AnomalyKind::DuplicateSecret { handles } => write!(
                f,
                "registration secret is shared by {}",
                handles.join(", ")
            ),
        }
    }
}

/// A held-back record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    /// Table the record belongs to.
    pub domain: Domain,
    /// Record key (may be partial for malformed rows).
    pub key: RecordKey,
    pub kind: AnomalyKind,
}

impl Anomaly {
    pub fn new(domain: Domain, key: RecordKey, kind: AnomalyKind) -> Self {
        Self { domain, key, kind }
    }

    /// Text sent to the operator.
    pub fn message(&self) -> String {
        format!(
            "Schedule sync skipped a record and will retry on the next pass.\n{}\nTable: {}, record: '{}'",
            self.kind, self.domain, self.key
        )
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.domain, self.key, self.kind)
    }
}
