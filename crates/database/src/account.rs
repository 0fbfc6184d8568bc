//! Account operations.
//!
//! Bot-side edits (`create_account`, `update_account`, `authenticate`,
//! `mark_account_deleted`) tag the record for the next push. The `*_synced`
//! helpers run inside the reconciliation transaction and are guarded by the
//! revision seen when the snapshot was pulled.

use std::collections::{BTreeSet, HashMap};

use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{map_unique_violation, DatabaseError, Result};
use crate::models::{Account, LifecycleState};
use crate::validation::{validate_display_name, validate_handle};

const ACCOUNT_COLUMNS: &str = "id, handle, display_name, secret, chat_id, state, revision";

async fn fetch_roles(pool: &SqlitePool) -> Result<HashMap<i64, BTreeSet<String>>> {
    let rows = sqlx::query_as::<_, (i64, String)>(
        r#"
        SELECT account_id, role
        FROM account_roles
        ORDER BY account_id, role
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut roles: HashMap<i64, BTreeSet<String>> = HashMap::new();
    for (account_id, role) in rows {
        roles.entry(account_id).or_default().insert(role);
    }
    Ok(roles)
}

async fn with_roles(pool: &SqlitePool, mut accounts: Vec<Account>) -> Result<Vec<Account>> {
    let mut roles = fetch_roles(pool).await?;
    for account in &mut accounts {
        account.roles = roles.remove(&account.id).unwrap_or_default();
    }
    Ok(accounts)
}

async fn replace_roles(
    conn: &mut SqliteConnection,
    account_id: i64,
    roles: &BTreeSet<String>,
) -> Result<()> {
    sqlx::query("DELETE FROM account_roles WHERE account_id = ?")
        .bind(account_id)
        .execute(&mut *conn)
        .await?;

    for role in roles {
        sqlx::query("INSERT INTO account_roles (account_id, role) VALUES (?, ?)")
            .bind(account_id)
            .bind(role)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Create a bot-originated account. It is pushed to the table on the next pass.
pub async fn create_account(pool: &SqlitePool, account: &Account) -> Result<i64> {
    validate_handle(&account.handle)?;
    validate_display_name(&account.display_name)?;

    let mut tx = pool.begin().await?;
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO accounts (handle, display_name, secret, chat_id, state, revision)
        VALUES (?, ?, ?, ?, ?, 1)
        RETURNING id
        "#,
    )
    .bind(account.handle.trim())
    .bind(account.display_name.trim())
    .bind(&account.secret)
    .bind(&account.chat_id)
    .bind(LifecycleState::PendingPush)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| map_unique_violation(e, "Account", &account.handle))?;

    replace_roles(&mut tx, id, &account.roles).await?;
    tx.commit().await?;

    tracing::debug!("Created account {} ({})", account.handle, id);
    Ok(id)
}

/// Get a live account by ID.
pub async fn get_account(pool: &SqlitePool, id: i64) -> Result<Account> {
    let query = format!(
        "SELECT {} FROM accounts WHERE id = ? AND state IN ('active', 'pending_push')",
        ACCOUNT_COLUMNS
    );
    let account = sqlx::query_as::<_, Account>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "Account",
            id: id.to_string(),
        })?;

    let mut accounts = with_roles(pool, vec![account]).await?;
    accounts.pop().ok_or_else(|| DatabaseError::NotFound {
        entity: "Account",
        id: id.to_string(),
    })
}

/// Get a live account by handle.
pub async fn get_account_by_handle(pool: &SqlitePool, handle: &str) -> Result<Account> {
    let query = format!(
        "SELECT {} FROM accounts WHERE handle = ? AND state IN ('active', 'pending_push')",
        ACCOUNT_COLUMNS
    );
    let account = sqlx::query_as::<_, Account>(&query)
        .bind(handle.trim())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "Account",
            id: handle.to_string(),
        })?;

    let mut accounts = with_roles(pool, vec![account]).await?;
    accounts.pop().ok_or_else(|| DatabaseError::NotFound {
        entity: "Account",
        id: handle.to_string(),
    })
}

/// List every account in any state, with roles, ordered by handle.
pub async fn list_accounts(pool: &SqlitePool) -> Result<Vec<Account>> {
    let query = format!("SELECT {} FROM accounts ORDER BY handle", ACCOUNT_COLUMNS);
    let accounts = sqlx::query_as::<_, Account>(&query).fetch_all(pool).await?;
    with_roles(pool, accounts).await
}

/// List live accounts holding a role that can be reached by chat.
pub async fn accounts_with_role(pool: &SqlitePool, role: &str) -> Result<Vec<Account>> {
    let query = format!(
        r#"
        SELECT {}
        FROM accounts
        WHERE chat_id IS NOT NULL
          AND state IN ('active', 'pending_push')
          AND id IN (SELECT account_id FROM account_roles WHERE role = ?)
        ORDER BY handle
        "#,
        ACCOUNT_COLUMNS
    );
    let accounts = sqlx::query_as::<_, Account>(&query)
        .bind(role)
        .fetch_all(pool)
        .await?;
    with_roles(pool, accounts).await
}

/// Roles held by the live account bound to a chat session.
///
/// Returns an empty set for unknown chats.
pub async fn roles_for_chat(pool: &SqlitePool, chat_id: &str) -> Result<BTreeSet<String>> {
    let roles = sqlx::query_scalar::<_, String>(
        r#"
        SELECT r.role
        FROM account_roles r
        INNER JOIN accounts a ON a.id = r.account_id
        WHERE a.chat_id = ? AND a.state IN ('active', 'pending_push')
        "#,
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await?;

    Ok(roles.into_iter().collect())
}

/// Bind a chat session to the account holding `secret`.
///
/// Several accounts sharing one secret is reported as `Ambiguous` instead of
/// picking one of them.
pub async fn authenticate(pool: &SqlitePool, secret: &str, chat_id: &str) -> Result<Account> {
    let secret = secret.trim();
    if secret.is_empty() {
        return Err(DatabaseError::NotFound {
            entity: "Account",
            id: "<empty secret>".to_string(),
        });
    }

    let ids = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT id
        FROM accounts
        WHERE secret = ? AND state IN ('active', 'pending_push')
        "#,
    )
    .bind(secret)
    .fetch_all(pool)
    .await?;

    let id = match ids.as_slice() {
        [] => {
            return Err(DatabaseError::NotFound {
                entity: "Account",
                id: "<secret>".to_string(),
            })
        }
        [id] => *id,
        _ => {
            return Err(DatabaseError::Ambiguous {
                entity: "Account",
                id: "<secret>".to_string(),
                count: ids.len(),
            })
        }
    };

    sqlx::query(
        r#"
        UPDATE accounts
        SET chat_id = ?, state = ?, revision = revision + 1, updated_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(chat_id)
    .bind(LifecycleState::PendingPush)
    .bind(id)
    .execute(pool)
    .await?;

    tracing::info!("Chat {} authenticated as account {}", chat_id, id);
    get_account(pool, id).await
}

/// Apply a bot-side edit of name, secret and roles.
pub async fn update_account(pool: &SqlitePool, account: &Account) -> Result<()> {
    validate_display_name(&account.display_name)?;

    let mut tx = pool.begin().await?;
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET display_name = ?, secret = ?, state = ?, revision = revision + 1,
            updated_at = datetime('now')
        WHERE handle = ? AND state IN ('active', 'pending_push')
        "#,
    )
    .bind(account.display_name.trim())
    .bind(&account.secret)
    .bind(LifecycleState::PendingPush)
    .bind(account.handle.trim())
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound {
            entity: "Account",
            id: account.handle.clone(),
        });
    }

    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM accounts WHERE handle = ?")
        .bind(account.handle.trim())
        .fetch_one(&mut *tx)
        .await?;
    replace_roles(&mut tx, id, &account.roles).await?;
    tx.commit().await?;

    Ok(())
}

/// Tag an account and its whole schedule for removal from the table and
/// later purge.
pub async fn mark_account_deleted(pool: &SqlitePool, handle: &str) -> Result<()> {
    let mut tx = pool.begin().await?;
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE accounts
        SET state = ?, revision = revision + 1, updated_at = datetime('now')
        WHERE handle = ? AND state IN ('active', 'pending_push')
        RETURNING id
        "#,
    )
    .bind(LifecycleState::DeletedLocally)
    .bind(handle.trim())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| DatabaseError::NotFound {
        entity: "Account",
        id: handle.to_string(),
    })?;

    for table in ["recurring_templates", "dated_events"] {
        let query = format!(
            r#"
            UPDATE {}
            SET state = ?, revision = revision + 1, updated_at = datetime('now')
            WHERE account_id = ? AND state IN ('active', 'pending_push')
            "#,
            table
        );
        sqlx::query(&query)
            .bind(LifecycleState::DeletedLocally)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Insert an account materialised from the table.
pub async fn insert_synced(conn: &mut SqliteConnection, account: &Account) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO accounts (handle, display_name, secret, chat_id, state, revision)
        VALUES (?, ?, ?, ?, ?, 0)
        RETURNING id
        "#,
    )
    .bind(&account.handle)
    .bind(&account.display_name)
    .bind(&account.secret)
    .bind(&account.chat_id)
    .bind(account.state)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_unique_violation(e, "Account", &account.handle))?;

    replace_roles(conn, id, &account.roles).await?;
    Ok(id)
}

/// Write merged values. Returns false when the record changed since the pull.
pub async fn update_synced(conn: &mut SqliteConnection, account: &Account) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
        SET display_name = ?, secret = ?, state = ?, updated_at = datetime('now')
        WHERE id = ? AND revision = ?
        "#,
    )
    .bind(&account.display_name)
    .bind(&account.secret)
    .bind(account.state)
    .bind(account.id)
    .bind(account.revision)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    replace_roles(conn, account.id, &account.roles).await?;
    Ok(true)
}

/// Delete an account (and, by cascade, its schedule). Revision guarded.
pub async fn purge(conn: &mut SqliteConnection, id: i64, revision: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM accounts WHERE id = ? AND revision = ?")
        .bind(id)
        .bind(revision)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Flip a pushed account from `PendingPush` to `Active`. Revision guarded.
pub async fn confirm_pushed(conn: &mut SqliteConnection, id: i64, revision: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE accounts
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
