//! Weekly template table adapter.

use async_trait::async_trait;
use database::validation::{normalize_time, normalize_time_range, validate_weekday};
use database::{template, LifecycleState, Modality, RecurringTemplate, ValidationError};
use sqlx::SqliteConnection;

use super::{malformed, Persist, SyncKind};
use crate::anomaly::AnomalyKind;
use crate::keys::{template_key, RecordKey};
use crate::owners::OwnerIndex;
use crate::row::{Domain, Row};

pub const OWNER: &str = "owner";
pub const WEEKDAY: &str = "weekday";
pub const START: &str = "start";
pub const END: &str = "end";
pub const MODALITY: &str = "modality";

/// Recurring templates kind. Only the modality is editable in place; changing
/// owner, weekday or times makes a different slot.
pub struct Templates;

fn parse_weekday(value: &str) -> Result<i64, AnomalyKind> {
    let weekday = value
        .parse::<i64>()
        .map_err(|_| malformed(format!("weekday '{}' is not a number", value)))?;
    validate_weekday(weekday).map_err(malformed)?;
    Ok(weekday)
}

pub(super) fn parse_modality(value: &str) -> Result<Modality, AnomalyKind> {
    Modality::from_str(value)
        .ok_or_else(|| malformed(ValidationError::InvalidModality(value.to_string())))
}

impl SyncKind for Templates {
    type Record = RecurringTemplate;

    const DOMAIN: Domain = Domain::Templates;

    fn record_key(record: &RecurringTemplate) -> RecordKey {
        template_key(
            &record.owner_handle,
            &record.weekday.to_string(),
            &record.start_time,
            &record.end_time,
        )
    }

    fn row_key(row: &Row) -> RecordKey {
        template_key(row.get(OWNER), row.get(WEEKDAY), row.get(START), row.get(END))
    }

    fn state(record: &RecurringTemplate) -> LifecycleState {
        record.state
    }

    fn set_state(record: &mut RecurringTemplate, state: LifecycleState) {
        record.state = state;
    }

    fn record_owner(record: &RecurringTemplate) -> Option<&str> {
        Some(&record.owner_handle)
    }

    fn construct(row: &Row, owners: &OwnerIndex) -> Result<RecurringTemplate, AnomalyKind> {
        let weekday = parse_weekday(row.get(WEEKDAY))?;
        let (start_time, end_time) =
            normalize_time_range(row.get(START), row.get(END)).map_err(malformed)?;
        let modality = parse_modality(row.get(MODALITY))?;

        let handle = row.get(OWNER);
        let owner = owners.get(handle).ok_or_else(|| AnomalyKind::UnknownOwner {
            handle: handle.to_string(),
        })?;

        Ok(RecurringTemplate {
            id: 0,
            account_id: owner.id,
            owner_handle: owner.handle.clone(),
            weekday,
            start_time,
            end_time,
            modality,
            state: LifecycleState::Active,
            revision: 0,
        })
    }

    fn adopt_fields(record: &mut RecurringTemplate, incoming: &RecurringTemplate) -> bool {
        let changed = record.modality != incoming.modality;
        record.modality = incoming.modality;
        changed
    }

    fn copy_record_fields(row: &mut Row, record: &RecurringTemplate) {
        row.set(OWNER, record.owner_handle.as_str());
        row.set(WEEKDAY, record.weekday.to_string());
        row.set(START, record.start_time.as_str());
        row.set(END, record.end_time.as_str());
        row.set(MODALITY, record.modality.as_str());
    }

    fn display_order(row: &Row) -> String {
        let time = |column| normalize_time(row.get(column)).unwrap_or_else(|_| row.get(column).to_string());
        format!(
            "{};{};{};{}",
            row.get(WEEKDAY),
            time(START),
            time(END),
            row.get(OWNER)
        )
    }
}

#[async_trait]
impl Persist for Templates {
    async fn insert(conn: &mut SqliteConnection, record: &RecurringTemplate) -> database::Result<i64> {
        template::insert_synced(conn, record).await
    }

    async fn update(conn: &mut SqliteConnection, record: &RecurringTemplate) -> database::Result<bool> {
        template::update_synced(conn, record).await
    }

    async fn purge(conn: &mut SqliteConnection, record: &RecurringTemplate) -> database::Result<bool> {
        template::purge(conn, record.id, record.revision).await
    }

    async fn confirm(conn: &mut SqliteConnection, record: &RecurringTemplate) -> database::Result<bool> {
        template::confirm_pushed(conn, record.id, record.revision).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use database::Account;

    fn owners() -> OwnerIndex {
        let mut alice = Account::new("alice", "Alice");
        alice.id = 7;
        OwnerIndex::from_accounts(vec![alice])
    }

    fn row(owner: &str, weekday: &str, start: &str, end: &str) -> Row {
        Row::new()
            .with(OWNER, owner)
            .with(WEEKDAY, weekday)
            .with(START, start)
            .with(END, end)
            .with(MODALITY, "Online")
    }

    #[test]
    fn test_construct_normalises() {
        let template = Templates::construct(&row("alice", "2", "9:00", "10:00"), &owners()).unwrap();

        assert_eq!(template.account_id, 7);
        assert_eq!(template.start_time, "09:00");
        assert_eq!(template.modality, Modality::Online);
        assert_eq!(
            Templates::record_key(&template),
            Templates::row_key(&row("alice", "2", "9:00", "10:00"))
        );
    }

    #[test]
    fn test_construct_anomalies() {
        let owners = owners();

        assert!(matches!(
            Templates::construct(&row("alice", "8", "09:00", "10:00"), &owners),
            Err(AnomalyKind::MalformedRow { .. })
        ));
        assert!(matches!(
            Templates::construct(&row("alice", "tue", "09:00", "10:00"), &owners),
            Err(AnomalyKind::MalformedRow { .. })
        ));
        assert!(matches!(
            Templates::construct(&row("alice", "1", "10:00", "09:00"), &owners),
            Err(AnomalyKind::MalformedRow { .. })
        ));
        assert_eq!(
            Templates::construct(&row("", "1", "09:00", "10:00"), &owners),
            Err(AnomalyKind::UnknownOwner {
                handle: String::new()
            })
        );
        assert_eq!(
            Templates::construct(&row("alcie", "1", "09:00", "10:00"), &owners),
            Err(AnomalyKind::UnknownOwner {
                handle: "alcie".to_string()
            })
        );
    }

    #[test]
    fn test_display_order_is_weekday_then_time() {
        let mut rows = vec![
            row("bob", "3", "09:00", "10:00"),
            row("alice", "1", "14:00", "15:00"),
            row("carol", "1", "9:00", "10:00"),
        ];
        super::super::sort_rows::<Templates>(&mut rows);

        let owners: Vec<&str> = rows.iter().map(|r| r.get(OWNER)).collect();
        assert_eq!(owners, vec!["carol", "alice", "bob"]);
    }
}
