//! Recurring template operations.

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DatabaseError, Result};
use crate::models::{LifecycleState, Modality, RecurringTemplate};
use crate::validation::{normalize_time_range, validate_weekday};

const TEMPLATE_SELECT: &str = r#"
    SELECT t.id, t.account_id, a.handle AS owner_handle, t.weekday, t.start_time,
           t.end_time, t.modality, t.state, t.revision
    FROM recurring_templates t
    INNER JOIN accounts a ON a.id = t.account_id
"#;

/// Create a weekly slot, or update the modality of an existing one.
///
/// Slots are identified by owner, weekday and time range. The slot is tagged
/// for the next push either way.
pub async fn create_or_update_template(
    pool: &SqlitePool,
    owner_handle: &str,
    weekday: i64,
    start_time: &str,
    end_time: &str,
    modality: Modality,
) -> Result<RecurringTemplate> {
    validate_weekday(weekday)?;
    let (start_time, end_time) = normalize_time_range(start_time, end_time)?;

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
        INSERT INTO recurring_templates
            (account_id, weekday, start_time, end_time, modality, state, revision)
        VALUES (?, ?, ?, ?, ?, ?, 1)
        ON CONFLICT(account_id, weekday, start_time, end_time) DO UPDATE SET
            modality = excluded.modality,
            state = excluded.state,
            revision = revision + 1,
            updated_at = datetime('now')
        RETURNING id
        "#,
    )
    .bind(account_id)
    .bind(weekday)
    .bind(&start_time)
    .bind(&end_time)
    .bind(modality)
    .bind(LifecycleState::PendingPush)
    .fetch_one(pool)
    .await?;

    get_template(pool, id).await
}

/// Get a template by ID in any state.
pub async fn get_template(pool: &SqlitePool, id: i64) -> Result<RecurringTemplate> {
    let query = format!("{} WHERE t.id = ?", TEMPLATE_SELECT);
    sqlx::query_as::<_, RecurringTemplate>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "RecurringTemplate",
            id: id.to_string(),
        })
}

/// Live templates for one account, ordered by weekday and time.
pub async fn templates_for(pool: &SqlitePool, owner_handle: &str) -> Result<Vec<RecurringTemplate>> {
    let query = format!(
        r#"{}
        WHERE a.handle = ? AND t.state IN ('active', 'pending_push')
        ORDER BY t.weekday, t.start_time
        "#,
        TEMPLATE_SELECT
    );
    let templates = sqlx::query_as::<_, RecurringTemplate>(&query)
        .bind(owner_handle.trim())
        .fetch_all(pool)
        .await?;

    Ok(templates)
}

/// Every template in any state.
pub async fn list_templates(pool: &SqlitePool) -> Result<Vec<RecurringTemplate>> {
    let query = format!("{} ORDER BY t.weekday, t.start_time, a.handle", TEMPLATE_SELECT);
    let templates = sqlx::query_as::<_, RecurringTemplate>(&query)
        .fetch_all(pool)
        .await?;

    Ok(templates)
}

/// Tag a template for removal from the table and later purge.
///
/// Returns false when no live template has that ID.
pub async fn remove_template(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE recurring_templates
        SET state = ?, revision = revision + 1, updated_at = datetime('now')
        WHERE id = ? AND state IN ('active', 'pending_push')
        "#,
    )
    .bind(LifecycleState::DeletedLocally)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Insert a template materialised from the table. The owner is resolved by
/// handle, so accounts inserted earlier in the same transaction are visible.
pub async fn insert_synced(conn: &mut SqliteConnection, template: &RecurringTemplate) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO recurring_templates
            (account_id, weekday, start_time, end_time, modality, state, revision)
        SELECT id, ?, ?, ?, ?, ?, 0
        FROM accounts
        WHERE handle = ?
        RETURNING id
        "#,
    )
    .bind(template.weekday)
    .bind(&template.start_time)
    .bind(&template.end_time)
    .bind(template.modality)
    .bind(template.state)
    .bind(&template.owner_handle)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| DatabaseError::NotFound {
        entity: "Account",
        id: template.owner_handle.clone(),
    })?;

    Ok(id)
}

/// Write merged values. Returns false when the record changed since the pull.
pub async fn update_synced(conn: &mut SqliteConnection, template: &RecurringTemplate) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE recurring_templates
        SET modality = ?, state = ?, updated_at = datetime('now')
        WHERE id = ? AND revision = ?
        "#,
    )
    .bind(template.modality)
    .bind(template.state)
    .bind(template.id)
    .bind(template.revision)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete a template. Revision guarded.
pub async fn purge(conn: &mut SqliteConnection, id: i64, revision: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM recurring_templates WHERE id = ? AND revision = ?")
        .bind(id)
        .bind(revision)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Flip a pushed template from `PendingPush` to `Active`. Revision guarded.
pub async fn confirm_pushed(conn: &mut SqliteConnection, id: i64, revision: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE recurring_templates
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

    #[tokio::test]
    async fn test_create_or_update_template() {
        let db = test_db().await;
        account::create_account(db.pool(), &Account::new("alice", "Alice"))
            .await
            .unwrap();

        let created = create_or_update_template(db.pool(), "alice", 2, "9:00", "10:00", Modality::Online)
            .await
            .unwrap();
        assert_eq!(created.owner_handle, "alice");
        assert_eq!(created.start_time, "09:00");
        assert_eq!(created.state, LifecycleState::PendingPush);
        assert_eq!(created.revision, 1);

        let updated =
            create_or_update_template(db.pool(), "alice", 2, "09:00", "10:00", Modality::Offline)
                .await
                .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.modality, Modality::Offline);
        assert_eq!(updated.revision, 2);

        assert_eq!(templates_for(db.pool(), "alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_template_requires_known_owner() {
        let db = test_db().await;

        let result =
            create_or_update_template(db.pool(), "ghost", 0, "09:00", "10:00", Modality::Online).await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_template_rejects_bad_input() {
        let db = test_db().await;
        account::create_account(db.pool(), &Account::new("alice", "Alice"))
            .await
            .unwrap();

        let result =
            create_or_update_template(db.pool(), "alice", 7, "09:00", "10:00", Modality::Online).await;
        assert!(matches!(result, Err(DatabaseError::Invalid(_))));

        let result =
            create_or_update_template(db.pool(), "alice", 1, "11:00", "10:00", Modality::Online).await;
        assert!(matches!(result, Err(DatabaseError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_remove_template() {
        let db = test_db().await;
        account::create_account(db.pool(), &Account::new("alice", "Alice"))
            .await
            .unwrap();
        let created = create_or_update_template(db.pool(), "alice", 4, "15:00", "16:00", Modality::Rental)
            .await
            .unwrap();

        assert!(remove_template(db.pool(), created.id).await.unwrap());
        assert!(!remove_template(db.pool(), created.id).await.unwrap());
        assert!(templates_for(db.pool(), "alice").await.unwrap().is_empty());

        let all = list_templates(db.pool()).await.unwrap();
        assert_eq!(all[0].state, LifecycleState::DeletedLocally);
    }
}
