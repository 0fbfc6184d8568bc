//! Accounts table adapter.

use std::collections::BTreeMap;

use async_trait::async_trait;
use database::validation::{join_roles, parse_roles, validate_display_name, validate_handle};
use database::{account, Account, LifecycleState};
use sqlx::SqliteConnection;

use super::{malformed, Persist, SyncKind};
use crate::anomaly::AnomalyKind;
use crate::keys::{account_key, RecordKey};
use crate::owners::OwnerIndex;
use crate::row::{Domain, Row};

pub const HANDLE: &str = "handle";
pub const NAME: &str = "name";
pub const SECRET: &str = "secret";
pub const CHAT_ID: &str = "chat_id";
pub const ROLES: &str = "roles";

/// Accounts kind. The chat id is owned by the bot and only flows outward.
pub struct Accounts;

impl SyncKind for Accounts {
    type Record = Account;

    const DOMAIN: Domain = Domain::Accounts;

    fn record_key(record: &Account) -> RecordKey {
        account_key(&record.handle)
    }

    fn row_key(row: &Row) -> RecordKey {
        account_key(row.get(HANDLE))
    }

    fn state(record: &Account) -> LifecycleState {
        record.state
    }

    fn set_state(record: &mut Account, state: LifecycleState) {
        record.state = state;
    }

    fn construct(row: &Row, _owners: &OwnerIndex) -> Result<Account, AnomalyKind> {
        let handle = row.get(HANDLE);
        validate_handle(handle).map_err(malformed)?;
        validate_display_name(row.get(NAME)).map_err(malformed)?;

        let mut account = Account::new(handle, row.get(NAME));
        account.secret = row.get_non_empty(SECRET).map(str::to_string);
        account.roles = parse_roles(row.get(ROLES));
        account.state = LifecycleState::Active;
        Ok(account)
    }

    fn adopt_fields(record: &mut Account, incoming: &Account) -> bool {
        let changed = record.display_name != incoming.display_name
            || record.secret != incoming.secret
            || record.roles != incoming.roles;

        record.display_name = incoming.display_name.clone();
        record.secret = incoming.secret.clone();
        record.roles = incoming.roles.clone();
        changed
    }

    fn copy_record_fields(row: &mut Row, record: &Account) {
        row.set(HANDLE, record.handle.as_str());
        row.set(NAME, record.display_name.as_str());
        row.set(SECRET, record.secret.clone().unwrap_or_default());
        row.set(CHAT_ID, record.chat_id.clone().unwrap_or_default());
        row.set(ROLES, join_roles(&record.roles));
    }

    fn display_order(row: &Row) -> String {
        row.get(HANDLE).to_string()
    }

    fn cross_row_anomalies(rows: &[Row]) -> BTreeMap<usize, AnomalyKind> {
        let mut by_secret: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, row) in rows.iter().enumerate() {
            if let Some(secret) = row.get_non_empty(SECRET) {
                by_secret.entry(secret).or_default().push(idx);
            }
        }

        let mut anomalies = BTreeMap::new();
        for positions in by_secret.values().filter(|p| p.len() > 1) {
            let handles: Vec<String> = positions
                .iter()
                .map(|&idx| rows[idx].get(HANDLE).to_string())
                .collect();
            for &idx in positions {
                anomalies.insert(
                    idx,
                    AnomalyKind::DuplicateSecret {
                        handles: handles.clone(),
                    },
                );
            }
        }
        anomalies
    }
}

#[async_trait]
impl Persist for Accounts {
    async fn insert(conn: &mut SqliteConnection, record: &Account) -> database::Result<i64> {
        account::insert_synced(conn, record).await
    }

    async fn update(conn: &mut SqliteConnection, record: &Account) -> database::Result<bool> {
        account::update_synced(conn, record).await
    }

    async fn purge(conn: &mut SqliteConnection, record: &Account) -> database::Result<bool> {
        account::purge(conn, record.id, record.revision).await
    }

    async fn confirm(conn: &mut SqliteConnection, record: &Account) -> database::Result<bool> {
        account::confirm_pushed(conn, record.id, record.revision).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(handle: &str, secret: &str) -> Row {
        Row::new()
            .with(HANDLE, handle)
            .with(NAME, format!("{} Name", handle))
            .with(SECRET, secret)
            .with(ROLES, "student")
    }

    #[test]
    fn test_construct_from_row() {
        let account = Accounts::construct(
            &row("alice", "s1").with(ROLES, "Student, admin"),
            &OwnerIndex::default(),
        )
        .unwrap();

        assert_eq!(account.handle, "alice");
        assert_eq!(account.secret.as_deref(), Some("s1"));
        assert_eq!(account.state, LifecycleState::Active);
        assert!(account.has_role("admin") && account.has_role("student"));
    }

    #[test]
    fn test_construct_rejects_bad_handle() {
        let result = Accounts::construct(&row("", "s1"), &OwnerIndex::default());
        assert!(matches!(result, Err(AnomalyKind::MalformedRow { .. })));
    }

    #[test]
    fn test_chat_id_flows_outward_only() {
        let mut record = Account::new("alice", "Alice");
        record.chat_id = Some("chat-7".to_string());

        let incoming =
            Accounts::construct(&row("alice", "").with(CHAT_ID, "forged"), &OwnerIndex::default())
                .unwrap();
        Accounts::adopt_fields(&mut record, &incoming);
        assert_eq!(record.chat_id.as_deref(), Some("chat-7"));

        let mut out = row("alice", "");
        Accounts::copy_record_fields(&mut out, &record);
        assert_eq!(out.get(CHAT_ID), "chat-7");
    }

    #[test]
    fn test_duplicate_secrets_flag_every_row() {
        let rows = vec![row("bob", "same"), row("alice", "unique"), row("carol", "same")];

        let anomalies = Accounts::cross_row_anomalies(&rows);

        assert_eq!(anomalies.len(), 2);
        assert!(anomalies.contains_key(&0) && anomalies.contains_key(&2));
        assert_eq!(
            anomalies[&0],
            AnomalyKind::DuplicateSecret {
                handles: vec!["bob".to_string(), "carol".to_string()]
            }
        );
    }

    #[test]
    fn test_blank_secrets_are_not_duplicates() {
        let rows = vec![row("bob", ""), row("carol", " ")];
        assert!(Accounts::cross_row_anomalies(&rows).is_empty());
    }
}
