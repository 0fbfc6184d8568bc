//! Database models.

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Reconciliation state carried by every synced record.
///
/// The tag decides which side wins when the record is merged against the
/// operator's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Present and agreed on both sides.
    Active,
    /// Changed by the bot since the last successful push; bot values win.
    PendingPush,
    /// The bot wants the record gone from the table, then purged.
    DeletedLocally,
    /// The row disappeared from the table; the record is being purged.
    DeletedExternally,
}

impl LifecycleState {
    /// Stored column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Active => "active",
            LifecycleState::PendingPush => "pending_push",
            LifecycleState::DeletedLocally => "deleted_locally",
            LifecycleState::DeletedExternally => "deleted_externally",
        }
    }

    /// Whether the record is visible to bot features (reminders, menus).
    pub fn is_live(&self) -> bool {
        matches!(self, LifecycleState::Active | LifecycleState::PendingPush)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a lesson is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Online,
    Offline,
    Rental,
}

impl Modality {
    /// Stored column value, also used in table cells.
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Online => "online",
            Modality::Offline => "offline",
            Modality::Rental => "rental",
        }
    }

    /// Parse a modality from a table cell or user input.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "online" => Some(Modality::Online),
            "offline" => Some(Modality::Offline),
            "rental" | "rent" => Some(Modality::Rental),
            _ => None,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A person known to the bot (student, tutor, operator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    /// Row ID (0 for records built during a pass and not yet inserted).
    pub id: i64,
    /// Operator-chosen unique handle, e.g. "alice".
    pub handle: String,
    /// Display name.
    pub display_name: String,
    /// One-time registration secret handed out by the operator.
    pub secret: Option<String>,
    /// Chat session identifier, set once the person authenticates.
    pub chat_id: Option<String>,
    /// Permission tags.
    #[sqlx(skip)]
    pub roles: BTreeSet<String>,
    /// Reconciliation state.
    pub state: LifecycleState,
    /// Bumped on every bot-side edit.
    pub revision: i64,
}

impl Account {
    /// Build a new account that has not been stored yet.
    pub fn new(handle: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: 0,
            handle: handle.into(),
            display_name: display_name.into(),
            secret: None,
            chat_id: None,
            roles: BTreeSet::new(),
            state: LifecycleState::PendingPush,
            revision: 0,
        }
    }

    /// Check whether the account holds a role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// A weekly recurring lesson slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RecurringTemplate {
    /// Row ID (0 until inserted).
    pub id: i64,
    /// Owning account.
    pub account_id: i64,
    /// Owning account handle.
    pub owner_handle: String,
    /// Day of the week, 0 = Monday.
    pub weekday: i64,
    /// Start time, `HH:MM`.
    pub start_time: String,
    /// End time, `HH:MM`.
    pub end_time: String,
    pub modality: Modality,
    pub state: LifecycleState,
    pub revision: i64,
}

/// A concrete lesson at an absolute time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DatedEvent {
    /// Row ID (0 until inserted).
    pub id: i64,
    /// Owning account.
    pub account_id: i64,
    /// Owning account handle.
    pub owner_handle: String,
    /// Local start timestamp.
    pub starts_at: NaiveDateTime,
    /// Start time, `HH:MM` (display copy of `starts_at`).
    pub start_time: String,
    /// End time, `HH:MM`.
    pub end_time: String,
    pub modality: Modality,
    /// External calendar reference, never written to the operator's table.
    pub calendar_event_id: Option<String>,
    pub state: LifecycleState,
    pub revision: i64,
}

/// A stored bot setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Setting {
    /// Setting name.
    pub key: String,
    /// Raw value.
    pub value: String,
    /// Last update timestamp.
    pub updated_at: String,
}
