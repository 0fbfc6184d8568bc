//! Flat table rows and the table domains they belong to.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A table of the operator's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    /// Accounts and their roles.
    Accounts,
    /// Weekly recurring slots.
    Templates,
    /// Dated lessons.
    Events,
}

impl Domain {
    /// All domains in pass order.
    pub const ALL: [Domain; 3] = [Domain::Accounts, Domain::Templates, Domain::Events];

    /// Table name, also used as the file stem of file-backed stores.
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Accounts => "accounts",
            Domain::Templates => "templates",
            Domain::Events => "events",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of an operator table: column name to cell text.
///
/// Columns the engine does not know about are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    cells: BTreeMap<String, String>,
}

impl Row {
    /// Create an empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style cell assignment.
    pub fn with(mut self, column: &str, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    /// Trimmed cell text, empty when the column is missing.
    pub fn get(&self, column: &str) -> &str {
        self.cells.get(column).map(|v| v.trim()).unwrap_or("")
    }

    /// Cell text, `None` when missing or blank.
    pub fn get_non_empty(&self, column: &str) -> Option<&str> {
        Some(self.get(column)).filter(|v| !v.is_empty())
    }

    /// Set a cell.
    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        self.cells.insert(column.to_string(), value.into());
    }

    /// All cells in column order.
    pub fn cells(&self) -> &BTreeMap<String, String> {
        &self.cells
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            cells: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
