use std::env;
use std::sync::Arc;
use std::time::Duration;

use sync_engine::{
    Database, JsonTableStore, LogChatSender, RoleNotifier, SyncConfig, SyncError, SyncOrchestrator,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Parse `--every <secs>` from the command line.
fn interval_from_args() -> Result<Option<Duration>, SyncError> {
    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [] => Ok(None),
        [flag, secs] if flag == "--every" => secs
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(|secs| Some(Duration::from_secs(secs)))
            .ok_or_else(|| SyncError::Config(format!("invalid interval '{}'", secs))),
        _ => Err(SyncError::Config("usage: sync-pass [--every <secs>]".to_string())),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let interval = interval_from_args()?;
    let config = SyncConfig::from_env()?;
    info!(
        "Syncing {} with tables in {}",
        config.sqlite_url,
        config.table_dir.display()
    );

    let db = Database::connect(&config.sqlite_url).await?;
    db.migrate().await?;

    let notifier = RoleNotifier::new(db.clone(), config.escalation_role.clone(), LogChatSender);
    let store = JsonTableStore::new(config.table_dir.clone());
    let orchestrator = SyncOrchestrator::new(db.clone(), store, config).with_notifier(Arc::new(notifier));

    let Some(interval) = interval else {
        let report = orchestrator.run_pass_with_timeout().await?;
        info!("Pass finished with {} anomalies", report.anomalies.len());
        db.close().await;
        return Ok(());
    };

    info!("Running a pass every {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // A failed pass is retried on the next tick.
                if let Err(e) = orchestrator.run_pass_with_timeout().await {
                    error!("Sync pass failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    db.close().await;
    Ok(())
}
