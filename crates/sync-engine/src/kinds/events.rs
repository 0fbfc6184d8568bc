//! Dated lessons table adapter.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use database::validation::{format_time, format_timestamp, normalize_time, normalize_time_range, parse_timestamp};
use database::{event, DatedEvent, LifecycleState};
use sqlx::SqliteConnection;

use super::templates::parse_modality;
use super::{malformed, Persist, SyncKind};
use crate::anomaly::AnomalyKind;
use crate::keys::{event_key, event_key_at, timestamp_segment, RecordKey};
use crate::owners::OwnerIndex;
use crate::row::{Domain, Row};

pub const OWNER: &str = "owner";
pub const STARTS_AT: &str = "starts_at";
pub const START: &str = "start";
pub const END: &str = "end";
pub const MODALITY: &str = "modality";

/// Dated events kind. The calendar reference stays internal.
pub struct Events;

/// Start timestamp of a row, when it parses.
pub fn row_starts_at(row: &Row) -> Option<NaiveDateTime> {
    parse_timestamp(row.get(STARTS_AT)).ok()
}

impl SyncKind for Events {
    type Record = DatedEvent;

    const DOMAIN: Domain = Domain::Events;

    fn record_key(record: &DatedEvent) -> RecordKey {
        event_key_at(&record.owner_handle, &record.starts_at)
    }

    fn row_key(row: &Row) -> RecordKey {
        event_key(row.get(OWNER), row.get(STARTS_AT))
    }

    fn state(record: &DatedEvent) -> LifecycleState {
        record.state
    }

    fn set_state(record: &mut DatedEvent, state: LifecycleState) {
        record.state = state;
    }

    fn record_owner(record: &DatedEvent) -> Option<&str> {
        Some(&record.owner_handle)
    }

    fn construct(row: &Row, owners: &OwnerIndex) -> Result<DatedEvent, AnomalyKind> {
        let starts_at = parse_timestamp(row.get(STARTS_AT)).map_err(malformed)?;
        let derived_start = format_time(&starts_at.time());

        // The start column is a display copy; blank means "same as the timestamp".
        if let Some(start) = row.get_non_empty(START) {
            let start = normalize_time(start).map_err(malformed)?;
            if start != derived_start {
                return Err(malformed(format!(
                    "start {} does not match timestamp {}",
                    start,
                    format_timestamp(&starts_at)
                )));
            }
        }

        let (start_time, end_time) =
            normalize_time_range(&derived_start, row.get(END)).map_err(malformed)?;
        let modality = parse_modality(row.get(MODALITY))?;

        let handle = row.get(OWNER);
        let owner = owners.get(handle).ok_or_else(|| AnomalyKind::UnknownOwner {
            handle: handle.to_string(),
        })?;

        Ok(DatedEvent {
            id: 0,
            account_id: owner.id,
            owner_handle: owner.handle.clone(),
            starts_at,
            start_time,
            end_time,
            modality,
            calendar_event_id: None,
            state: LifecycleState::Active,
            revision: 0,
        })
    }

    fn adopt_fields(record: &mut DatedEvent, incoming: &DatedEvent) -> bool {
        let changed = record.start_time != incoming.start_time
            || record.end_time != incoming.end_time
            || record.modality != incoming.modality;

        record.start_time = incoming.start_time.clone();
        record.end_time = incoming.end_time.clone();
        record.modality = incoming.modality;
        changed
    }

    fn copy_record_fields(row: &mut Row, record: &DatedEvent) {
        row.set(OWNER, record.owner_handle.as_str());
        row.set(STARTS_AT, format_timestamp(&record.starts_at));
        row.set(START, record.start_time.as_str());
        row.set(END, record.end_time.as_str());
        row.set(MODALITY, record.modality.as_str());
    }

    fn display_order(row: &Row) -> String {
        format!("{}|{}", timestamp_segment(row.get(STARTS_AT)), row.get(OWNER))
    }
}

#[async_trait]
impl Persist for Events {
    async fn insert(conn: &mut SqliteConnection, record: &DatedEvent) -> database::Result<i64> {
        event::insert_synced(conn, record).await
    }

    async fn update(conn: &mut SqliteConnection, record: &DatedEvent) -> database::Result<bool> {
        event::update_synced(conn, record).await
    }

    async fn purge(conn: &mut SqliteConnection, record: &DatedEvent) -> database::Result<bool> {
        event::purge(conn, record.id, record.revision).await
    }

    async fn confirm(conn: &mut SqliteConnection, record: &DatedEvent) -> database::Result<bool> {
        event::confirm_pushed(conn, record.id, record.revision).await
    }
}
