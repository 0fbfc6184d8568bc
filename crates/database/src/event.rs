//! Dated event operations.

use chrono::NaiveDateTime;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DatabaseError, Result};
use crate::models::{DatedEvent, LifecycleState, Modality};
use crate::validation::{format_time, normalize_time_range, truncate_to_minute};

const EVENT_SELECT: &str = r#"
    SELECT e.id, e.account_id, a.handle AS owner_handle, e.starts_at, e.start_time,
           e.end_time, e.modality, e.calendar_event_id, e.state, e.revision
    FROM dated_events e
    INNER JOIN accounts a ON a.id = e.account_id
"#;

/// Book a lesson, or update the end time and modality of an existing one.
///
/// Lessons are identified by owner and start minute. The lesson is tagged
/// for the next push either way.
pub async fn create_or_update_event(
    pool: &SqlitePool,
    owner_handle: &str,
    starts_at: NaiveDateTime,
    end_time: &str,
    modality: Modality,
) -> Result<DatedEvent> {
    let starts_at = truncate_to_minute(starts_at);
    let start_time = format_time(&starts_at.time());
    let (start_time, end_time) = normalize_time_range(&start_time, end_time)?;

    let account_id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM accounts WHERE handle = ? AND state IN ('active', 'pending_push')",
    )
    .bind(owner_handle.trim())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DatabaseError::NotFound {
        entity: "Account",
        id: owner_handle.to_string(),
    })?;

    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO dated_events
            (account_id, starts_at, start_time, end_time, modality, state, revision)
        VALUES (?, ?, ?, ?, ?, ?, 1)
        ON CONFLICT(account_id, starts_at) DO UPDATE SET
            end_time = excluded.end_time,
            modality = excluded.modality,
            state = excluded.state,
            revision = revision + 1,
            updated_at = datetime('now')
        RETURNING id
        "#,
    )
    .bind(account_id)
    .bind(starts_at)
    .bind(&start_time)
    .bind(&end_time)
    .bind(modality)
    .bind(LifecycleState::PendingPush)
    .fetch_one(pool)
    .await?;

    get_event(pool, id).await
}

/// Get an event by ID in any state.
pub async fn get_event(pool: &SqlitePool, id: i64) -> Result<DatedEvent> {
    let query = format!("{} WHERE e.id = ?", EVENT_SELECT);
    sqlx::query_as::<_, DatedEvent>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "DatedEvent",
            id: id.to_string(),
        })
}

/// Live events starting within `[start, end]`, ordered by start.
pub async fn get_schedule_between(
    pool: &SqlitePool,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Vec<DatedEvent>> {
    let query = format!(
        r#"{}
        WHERE e.starts_at BETWEEN ? AND ? AND e.state IN ('active', 'pending_push')
        ORDER BY e.starts_at, a.handle
        "#,
        EVENT_SELECT
    );
    let events = sqlx::query_as::<_, DatedEvent>(&query)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

    Ok(events)
}

/// Events in any state starting within `[from, until)`.
pub async fn list_events_in_window(
    pool: &SqlitePool,
    from: NaiveDateTime,
    until: NaiveDateTime,
) -> Result<Vec<DatedEvent>> {
    let query = format!(
        "{} WHERE e.starts_at >= ? AND e.starts_at < ? ORDER BY e.starts_at, a.handle",
        EVENT_SELECT
    );
    let events = sqlx::query_as::<_, DatedEvent>(&query)
        .bind(from)
        .bind(until)
        .fetch_all(pool)
        .await?;

    Ok(events)
}

/// Cancel a lesson. The row is removed from the table on the next pass and
/// the record purged after that.
///
/// Returns false when no live event has that ID.
pub async fn cancel_event(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE dated_events
        SET state = ?, revision = revision + 1, updated_at = datetime('now')
        WHERE id = ? AND state IN ('active', 'pending_push')
        "#,
    )
    .bind(LifecycleState::DeletedLocally)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        tracing::info!("Cancelled event {}", id);
    }
    Ok(result.rows_affected() > 0)
}

/// Attach the external calendar reference. This does not change the
/// lifecycle state since the reference never reaches the table.
pub async fn set_calendar_event_id(
    pool: &SqlitePool,
    id: i64,
    calendar_event_id: Option<&str>,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE dated_events
        SET calendar_event_id = ?, updated_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(calendar_event_id)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound {
            entity: "DatedEvent",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Insert an event materialised from the table, resolving the owner by handle.
pub async fn insert_synced(conn: &mut SqliteConnection, event: &DatedEvent) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO dated_events
            (account_id, starts_at, start_time, end_time, modality, calendar_event_id, state, revision)
        SELECT id, ?, ?, ?, ?, ?, ?, 0
        FROM accounts
        WHERE handle = ?
        RETURNING id
        "#,
    )
    .bind(event.starts_at)
    .bind(&event.start_time)
    .bind(&event.end_time)
    .bind(event.modality)
    .bind(&event.calendar_event_id)
    .bind(event.state)
    .bind(&event.owner_handle)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DatabaseError::NotFound {
        entity: "Account",
        id: event.owner_handle.clone(),
    })?;

    Ok(id)
}

/// Write merged values. Returns false when the record changed since the pull.
pub async fn update_synced(conn: &mut SqliteConnection, event: &DatedEvent) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE dated_events
        SET start_time = ?, end_time = ?, modality = ?, state = ?, updated_at = datetime('now')
        WHERE id = ? AND revision = ?
        "#,
    )
    .bind(&event.start_time)
    .bind(&event.end_time)
    .bind(event.modality)
    .bind(event.state)
    .bind(event.id)
    .bind(event.revision)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete an event. Revision guarded.
pub async fn purge(conn: &mut SqliteConnection, id: i64, revision: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM dated_events WHERE id = ? AND revision = ?")
        .bind(id)
        .bind(revision)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Flip a pushed event from `PendingPush` to `Active`. Revision guarded.
pub async fn confirm_pushed(conn: &mut SqliteConnection, id: i64, revision: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE dated_events
        SET state = ?, updated_at = datetime('now')
        WHERE id = ? AND revision = ? AND state = ?
        "#,
    )
    .bind(LifecycleState::Active)
    .bind(id)
    .bind(revision)
    .bind(LifecycleState::PendingPush)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account;
    use crate::models::Account;
    use crate::test_db;
    use chrono::NaiveDate;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    async fn db_with_alice() -> crate::Database {
        let db = test_db().await;
        account::create_account(db.pool(), &Account::new("alice", "Alice"))
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn test_create_and_query_schedule() {
        let db = db_with_alice().await;

        let event = create_or_update_event(db.pool(), "alice", at(1, 10), "11:00", Modality::Online)
            .await
            .unwrap();
        assert_eq!(event.start_time, "10:00");
        assert_eq!(event.starts_at, at(1, 10));
        assert_eq!(event.state, LifecycleState::PendingPush);

        create_or_update_event(db.pool(), "alice", at(5, 10), "11:00", Modality::Offline)
            .await
            .unwrap();

        let week = get_schedule_between(db.pool(), at(1, 0), at(3, 0)).await.unwrap();
        assert_eq!(week.len(), 1);
        assert_eq!(week[0].id, event.id);
    }

    #[tokio::test]
    async fn test_rebooking_same_slot_updates() {
        let db = db_with_alice().await;

        let first = create_or_update_event(db.pool(), "alice", at(1, 10), "11:00", Modality::Online)
            .await
            .unwrap();
        let second = create_or_update_event(db.pool(), "alice", at(1, 10), "11:30", Modality::Online)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.end_time, "11:30");
        assert_eq!(second.revision, 2);
    }

    #[tokio::test]
    async fn test_bookings_within_one_minute_share_a_slot() {
        let db = db_with_alice().await;
        let late = at(1, 10) + chrono::Duration::seconds(30);

        let first = create_or_update_event(db.pool(), "alice", at(1, 10), "11:00", Modality::Online)
            .await
            .unwrap();
        let second = create_or_update_event(db.pool(), "alice", late, "11:00", Modality::Offline)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.starts_at, at(1, 10));
        assert_eq!(second.modality, Modality::Offline);
        let window = list_events_in_window(db.pool(), at(1, 0), at(2, 0)).await.unwrap();
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_event() {
        let db = db_with_alice().await;
        let event = create_or_update_event(db.pool(), "alice", at(1, 10), "11:00", Modality::Online)
            .await
            .unwrap();

        assert!(cancel_event(db.pool(), event.id).await.unwrap());
        assert!(!cancel_event(db.pool(), event.id).await.unwrap());

        let cancelled = get_event(db.pool(), event.id).await.unwrap();
        assert_eq!(cancelled.state, LifecycleState::DeletedLocally);
        assert!(get_schedule_between(db.pool(), at(1, 0), at(2, 0))
            .await
            .unwrap()
            .is_empty());

        let window = list_events_in_window(db.pool(), at(1, 0), at(2, 0)).await.unwrap();
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn test_calendar_reference_keeps_state() {
        let db = db_with_alice().await;
        let event = create_or_update_event(db.pool(), "alice", at(1, 10), "11:00", Modality::Online)
            .await
            .unwrap();

        set_calendar_event_id(db.pool(), event.id, Some("gcal-1")).await.unwrap();

        let fetched = get_event(db.pool(), event.id).await.unwrap();
        assert_eq!(fetched.calendar_event_id.as_deref(), Some("gcal-1"));
        assert_eq!(fetched.revision, event.revision);
    }
}
