//! SQLite persistence layer for the tutoring schedule bot.
//!
//! This crate stores accounts, weekly lesson templates, dated lessons and
//! bot settings using SQLx with SQLite. Every schedule record carries a
//! [`LifecycleState`] that the reconciliation pass uses to merge the bot's
//! data with the operator's table.
//!
//! # Example
//!
//! ```no_run
//! use database::{account, template, Account, Database, Modality};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect and run migrations
//!     let db = Database::connect("sqlite:tutoring.db?mode=rwc").await?;
//!     db.migrate().await?;
//!
//!     // Register a student and a weekly slot; both reach the table on the next pass
//!     account::create_account(db.pool(), &Account::new("alice", "Alice")).await?;
//!     template::create_or_update_template(db.pool(), "alice", 0, "17:00", "18:00", Modality::Online)
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod error;
pub mod event;
pub mod models;
pub mod setting;
pub mod template;
pub mod validation;

pub use error::{DatabaseError, Result};
pub use models::{Account, DatedEvent, LifecycleState, Modality, RecurringTemplate, Setting};
pub use validation::ValidationError;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

/// Pooled handle to the bot database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Default pool size for database connections.
    const DEFAULT_POOL_SIZE: u32 = 10;

    /// Open the bot database.
    ///
    /// `url` is a sqlx SQLite URL; the file is created when missing. Foreign
    /// keys are switched on for every connection, which the account purge
    /// relies on to drop the account's schedule.
    ///
    /// ```no_run
    /// # async fn example() -> database::Result<()> {
    /// let db = database::Database::connect("sqlite:data/tutoring.db?mode=rwc").await?;
    /// db.migrate().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_pool_size(url, Self::DEFAULT_POOL_SIZE).await
    }

    /// Open the database with `pool_size` connections. Use 1 for
    /// `sqlite::memory:`, where every connection would see its own database.
    pub async fn connect_with_pool_size(url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::info!(
            "Connected to database: {} (pool size: {})",
            url,
            pool_size
        );

        Ok(Self { pool })
    }

    /// Bring the schedule schema up to date. Already applied migrations are
    /// skipped, so this runs at every start of the sync binary.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction. Dropping it without `commit` rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
pub(crate) async fn test_db() -> Database {
    // A private in-memory database lives per connection, so keep a single one.
    let db = Database::connect_with_pool_size("sqlite::memory:", 1)
        .await
        .unwrap();
    db.migrate().await.unwrap();
    db
}
