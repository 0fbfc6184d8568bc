//! Key/value storage for bot settings.

use sqlx::SqlitePool;

use crate::models::Setting;
use crate::Result;

/// Number of weeks ahead of the current one that the schedule table covers.
pub const SCHEDULE_WEEKS_AHEAD: &str = "schedule_weeks_ahead";

/// Create or update a setting.
pub async fn upsert_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value)
        VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = datetime('now')
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a setting by key.
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<Setting>> {
    let record = sqlx::query_as::<_, Setting>(
        r#"
        SELECT key, value, updated_at
        FROM settings
        WHERE key = ?
        "#,
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Remove a setting.
pub async fn clear_setting(pool: &SqlitePool, key: &str) -> Result<()> {
    sqlx::query(
        r#"
        DELETE FROM settings
        WHERE key = ?
        "#,
    )
    .bind(key)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_db;

    #[tokio::test]
    async fn test_setting_lifecycle() {
        let db = test_db().await;

        assert!(get_setting(db.pool(), SCHEDULE_WEEKS_AHEAD).await.unwrap().is_none());

        upsert_setting(db.pool(), SCHEDULE_WEEKS_AHEAD, "3").await.unwrap();
        upsert_setting(db.pool(), SCHEDULE_WEEKS_AHEAD, "4").await.unwrap();
        let setting = get_setting(db.pool(), SCHEDULE_WEEKS_AHEAD).await.unwrap().unwrap();
        assert_eq!(setting.value, "4");

        clear_setting(db.pool(), SCHEDULE_WEEKS_AHEAD).await.unwrap();
        assert!(get_setting(db.pool(), SCHEDULE_WEEKS_AHEAD).await.unwrap().is_none());
    }
}
