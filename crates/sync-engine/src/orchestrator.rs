//! Reconciliation pass driver.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use database::{account, event, template, Database};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::anomaly::Anomaly;
use crate::cache::{CacheInvalidator, CacheRegistry, CacheScope};
use crate::commit::{apply, confirm, DomainStats};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::kinds::{sort_rows, Accounts, Events, Templates};
use crate::merge::{merge, MergeResult};
use crate::notify::{LoggingNotifier, Notifier};
use crate::owners::OwnerIndex;
use crate::row::Domain;
use crate::settings::SettingsReader;
use crate::store::ExternalStore;
use crate::window::EventWindow;

/// Outcome of one pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    /// Local time the pass was computed for.
    pub started_at: NaiveDateTime,
    /// Events reconciled this pass.
    pub window: EventWindow,
    pub accounts: DomainStats,
    pub templates: DomainStats,
    pub events: DomainStats,
    /// Records held back, already escalated.
    pub anomalies: Vec<Anomaly>,
}

impl PassReport {
    pub fn stats(&self, domain: Domain) -> &DomainStats {
        match domain {
            Domain::Accounts => &self.accounts,
            Domain::Templates => &self.templates,
            Domain::Events => &self.events,
        }
    }

    /// Whether the pass changed anything on either side.
    pub fn changed(&self) -> bool {
        Domain::ALL.iter().any(|domain| self.stats(*domain).changed())
    }
}

/// Runs reconciliation passes between the bot database and an operator
/// table store.
///
/// A pass merges accounts first, then templates and events against the
/// accounts as they will be after the account merge. All internal changes
/// commit in one transaction before any table is written, so a failed pass
/// leaves nothing half-applied and can simply be re-run.
pub struct SyncOrchestrator<S: ExternalStore> {
    db: Database,
    store: S,
    notifier: Arc<dyn Notifier>,
    caches: Arc<CacheRegistry>,
    settings: SettingsReader,
    config: SyncConfig,
    /// Held for the duration of a pass.
    running: Mutex<()>,
}

impl<S: ExternalStore> SyncOrchestrator<S> {
    /// Create an orchestrator that logs anomalies and owns fresh caches.
    pub fn new(db: Database, store: S, config: SyncConfig) -> Self {
        let caches = Arc::new(CacheRegistry::new(config.cache_ttl));
        Self {
            settings: SettingsReader::new(db.clone(), caches.clone()),
            db,
            store,
            notifier: Arc::new(LoggingNotifier),
            caches,
            config,
            running: Mutex::new(()),
        }
    }

    /// Send anomaly reports to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Share caches with the rest of the bot.
    pub fn with_caches(mut self, caches: Arc<CacheRegistry>) -> Self {
        self.settings = SettingsReader::new(self.db.clone(), caches.clone());
        self.caches = caches;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn caches(&self) -> &Arc<CacheRegistry> {
        &self.caches
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run a pass for the current local time.
    pub async fn run_pass(&self) -> Result<PassReport, SyncError> {
        self.run_pass_at(Local::now().naive_local()).await
    }

    /// Run a pass, failing it when it exceeds the configured timeout.
    ///
    /// A timed-out pass is dropped before or after its commit, never halfway,
    /// so retrying is safe.
    pub async fn run_pass_with_timeout(&self) -> Result<PassReport, SyncError> {
        let timeout = self.config.pass_timeout;
        tokio::time::timeout(timeout, self.run_pass())
            .await
            .map_err(|_| SyncError::Timeout(timeout))?
    }

    /// Run a pass as if the local time were `now`.
    ///
    /// Fails with [`SyncError::PassInProgress`] when another pass is running.
    pub async fn run_pass_at(&self, now: NaiveDateTime) -> Result<PassReport, SyncError> {
        let _running = self
            .running
            .try_lock()
            .map_err(|_| SyncError::PassInProgress)?;

        let weeks_ahead = self.settings.weeks_ahead(self.config.weeks_ahead).await?;
        let window = EventWindow::around(now, weeks_ahead)?;
        info!(
            "Starting sync pass (events {} to {})",
            window.from, window.until
        );

        let pool = self.db.pool();

        // Accounts first: schedules are matched against the merged accounts.
        let (account_rows, accounts) = tokio::try_join!(self.store.read_rows(Domain::Accounts), async {
            Ok::<_, SyncError>(account::list_accounts(pool).await?)
        })?;
        let accounts_merged = merge::<Accounts>(accounts.clone(), account_rows, &OwnerIndex::default())?;
        let owners = OwnerIndex::after_merge(accounts, &accounts_merged);
        debug!("Owner index holds {} accounts", owners.len());

        let (template_rows, event_rows, templates, events) = tokio::try_join!(
            self.store.read_rows(Domain::Templates),
            self.store.read_rows(Domain::Events),
            async { Ok::<_, SyncError>(template::list_templates(pool).await?) },
            async {
                Ok::<_, SyncError>(event::list_events_in_window(pool, window.from, window.until).await?)
            },
        )?;
        let templates_merged = merge::<Templates>(templates, template_rows, &owners)?;

        let (event_rows, outside) = window.partition(event_rows);
        let mut events_merged = merge::<Events>(events, event_rows, &owners)?;
        if !outside.is_empty() {
            debug!("Carrying {} event rows outside the window", outside.len());
            events_merged.rows_out.extend(outside);
            sort_rows::<Events>(&mut events_merged.rows_out);
        }

        // One transaction for every internal change of the pass.
        let mut tx = self.db.begin().await?;
        let mut account_stats = apply::<Accounts>(&mut *tx, &accounts_merged).await?;
        let mut template_stats = apply::<Templates>(&mut *tx, &templates_merged).await?;
        let mut event_stats = apply::<Events>(&mut *tx, &events_merged).await?;
        tx.commit().await?;

        account_stats.rows_written = self.write_back(Domain::Accounts, &accounts_merged).await?;
        template_stats.rows_written = self.write_back(Domain::Templates, &templates_merged).await?;
        event_stats.rows_written = self.write_back(Domain::Events, &events_merged).await?;

        // Pushed records are only confirmed once every table write succeeded.
        let mut tx = self.db.begin().await?;
        confirm::<Accounts>(&mut *tx, &accounts_merged, &mut account_stats).await?;
        confirm::<Templates>(&mut *tx, &templates_merged, &mut template_stats).await?;
        confirm::<Events>(&mut *tx, &events_merged, &mut event_stats).await?;
        tx.commit().await?;

        let mut anomalies = accounts_merged.anomalies;
        anomalies.extend(templates_merged.anomalies);
        anomalies.extend(events_merged.anomalies);
        self.escalate(&anomalies).await;

        let report = PassReport {
            started_at: now,
            window,
            accounts: account_stats,
            templates: template_stats,
            events: event_stats,
            anomalies,
        };

        if report.changed() {
            self.caches.invalidate(CacheScope::All).await;
        }

        for domain in Domain::ALL {
            let stats = report.stats(domain);
            info!(
                "[{}] +{} ~{} -{} confirmed {} stale {} anomalies {} rows written {}",
                domain,
                stats.inserted,
                stats.updated,
                stats.deleted,
                stats.confirmed,
                stats.stale,
                stats.anomalies,
                stats.rows_written
            );
        }
        info!("Sync pass complete");

        Ok(report)
    }

    /// Rewrite a table when its merged content differs from what was read.
    async fn write_back<R>(&self, domain: Domain, merged: &MergeResult<R>) -> Result<usize, SyncError> {
        if !merged.external_dirty {
            debug!("[{}] table unchanged, not rewriting", domain);
            return Ok(0);
        }
        self.store.write_rows(domain, &merged.rows_out).await?;
        Ok(merged.rows_out.len())
    }

    /// Report anomalies, one message each. Delivery failures are logged only.
    async fn escalate(&self, anomalies: &[Anomaly]) {
        for anomaly in anomalies {
            warn!("Sync anomaly {}", anomaly);
            if let Err(e) = self.notifier.notify(&anomaly.message()).await {
                warn!("Failed to escalate anomaly {}: {}", anomaly.key, e);
            }
        }
    }
}
