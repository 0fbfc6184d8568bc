//! Reconciliation between the bot's schedule database and the operator's
//! tables.
//!
//! This crate provides the [`SyncOrchestrator`] type which keeps accounts,
//! weekly templates and dated lessons consistent between the SQLite database
//! used by the bot and a table store edited by hand.
//!
//! # Features
//!
//! - One generic merge ([`merge()`]) instantiated per entity kind
//! - Per-record [`LifecycleState`] decides which side wins
//! - Bad rows become [`Anomaly`] reports instead of failing the pass
//! - All internal changes commit atomically before any table is written
//! - Single-flight passes, optional timeout
//!
//! # Architecture
//!
//! ```text
//! run_pass
//!    ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SYNC ORCHESTRATOR                       │
//! │                                                             │
//! │  1. Pull accounts (table ‖ database), merge                 │
//! │         ↓                                                   │
//! │  2. Pull templates + events (table ‖ database), merge       │
//! │     against the merged accounts                             │
//! │         ↓                                                   │
//! │  3. Commit every internal change in one transaction         │
//! │         ↓                                                   │
//! │  4. Rewrite changed tables, confirm pushed records          │
//! │         ↓                                                   │
//! │  5. Escalate anomalies, invalidate caches                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use database::Database;
//! use sync_engine::{JsonTableStore, LogChatSender, RoleNotifier, SyncConfig, SyncOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::from_env()?;
//!     let db = Database::connect(&config.sqlite_url).await?;
//!     db.migrate().await?;
//!
//!     let notifier = RoleNotifier::new(db.clone(), config.escalation_role.clone(), LogChatSender);
//!     let store = JsonTableStore::new(config.table_dir.clone());
//!     let orchestrator = SyncOrchestrator::new(db, store, config).with_notifier(Arc::new(notifier));
//!
//!     let report = orchestrator.run_pass_with_timeout().await?;
//!     println!("{} anomalies", report.anomalies.len());
//!     Ok(())
//! }
//! ```

mod anomaly;
mod cache;
mod commit;
mod config;
mod error;
mod keys;
pub mod kinds;
mod lifecycle;
mod merge;
mod notify;
mod orchestrator;
mod owners;
mod permissions;
mod row;
mod settings;
mod store;
mod window;

// Public exports
pub use anomaly::{Anomaly, AnomalyKind};
pub use cache::{CacheInvalidator, CacheRegistry, CacheScope, TtlCache};
pub use commit::DomainStats;
pub use config::{sqlite_url_from_path, SyncConfig};
pub use error::SyncError;
pub use keys::{account_key, event_key, event_key_at, template_key, RecordKey};
pub use kinds::{Accounts, Events, Persist, SyncKind, Templates};
pub use lifecycle::{purge_state, when_matched, when_unmatched, MatchedTransition, UnmatchedTransition};
pub use merge::{merge, MergeResult};
pub use notify::{ChatSender, LogChatSender, LoggingNotifier, NoOpNotifier, Notifier, RoleNotifier};
pub use orchestrator::{PassReport, SyncOrchestrator};
pub use owners::OwnerIndex;
pub use permissions::PermissionChecker;
pub use row::{Domain, Row};
pub use settings::{SettingsReader, MAX_WEEKS_AHEAD};
pub use store::{ExternalStore, JsonTableStore, MemoryTableStore};
pub use window::EventWindow;

// Re-export commonly used types from dependencies
pub use database::{Database, LifecycleState};
