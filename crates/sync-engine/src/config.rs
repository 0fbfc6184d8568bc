//! Configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SyncError;
use crate::settings::MAX_WEEKS_AHEAD;

/// Reconciliation pass configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// SQLite URL of the bot database.
    pub sqlite_url: String,
    /// Directory holding the operator's JSON tables.
    pub table_dir: PathBuf,
    /// Weeks ahead of the current one covered by the events table, unless
    /// the `schedule_weeks_ahead` setting says otherwise.
    pub weeks_ahead: u32,
    /// TTL of the permission and settings caches.
    pub cache_ttl: Duration,
    /// Upper bound on one pass.
    pub pass_timeout: Duration,
    /// Role whose members receive anomaly reports.
    pub escalation_role: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sqlite_url: sqlite_url_from_path("./data/tutoring.db"),
            table_dir: PathBuf::from("./data/tables"),
            weeks_ahead: 2,
            cache_ttl: Duration::from_secs(300),
            pass_timeout: Duration::from_secs(60),
            escalation_role: "sysadmin".to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `SQLITE_PATH` | Database path or sqlite URL | `./data/tutoring.db` |
    /// | `SYNC_TABLE_DIR` | Operator table directory | `./data/tables` |
    /// | `SYNC_WEEKS_AHEAD` | Weeks of events after the current one | `2` |
    /// | `SYNC_CACHE_TTL_SECS` | Cache TTL in seconds | `300` |
    /// | `SYNC_PASS_TIMEOUT_SECS` | Pass timeout in seconds | `60` |
    /// | `SYNC_ESCALATION_ROLE` | Role notified about anomalies | `sysadmin` |
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SyncError> {
        let defaults = Self::default();

        let sqlite_url = lookup("SQLITE_PATH")
            .map(|path| sqlite_url_from_path(&path))
            .unwrap_or(defaults.sqlite_url);
        let table_dir = lookup("SYNC_TABLE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.table_dir);
        let weeks_ahead = parse_var(&lookup, "SYNC_WEEKS_AHEAD")?.unwrap_or(defaults.weeks_ahead);
        let cache_ttl = parse_var(&lookup, "SYNC_CACHE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.cache_ttl);
        let pass_timeout = parse_var(&lookup, "SYNC_PASS_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.pass_timeout);
        let escalation_role = lookup("SYNC_ESCALATION_ROLE")
            .map(|role| role.trim().to_lowercase())
            .filter(|role| !role.is_empty())
            .unwrap_or(defaults.escalation_role);

        if weeks_ahead > MAX_WEEKS_AHEAD {
            return Err(SyncError::Config(format!(
                "SYNC_WEEKS_AHEAD must be at most {}",
                MAX_WEEKS_AHEAD
            )));
        }
        if pass_timeout.is_zero() {
            return Err(SyncError::Config("SYNC_PASS_TIMEOUT_SECS must be positive".to_string()));
        }

        Ok(Self {
            sqlite_url,
            table_dir,
            weeks_ahead,
            cache_ttl,
            pass_timeout,
            escalation_role,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, SyncError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SyncError::Config(format!("{} has invalid value '{}'", key, raw))),
    }
}

/// Turn a plain file path into a sqlite URL; URLs pass through.
pub fn sqlite_url_from_path(path: &str) -> String {
    if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite:{}?mode=rwc", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<SyncConfig, SyncError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.sqlite_url, "sqlite:./data/tutoring.db?mode=rwc");
        assert_eq!(config.weeks_ahead, 2);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.escalation_role, "sysadmin");
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("SQLITE_PATH", "sqlite::memory:"),
            ("SYNC_TABLE_DIR", "/srv/tables"),
            ("SYNC_WEEKS_AHEAD", "4"),
            ("SYNC_ESCALATION_ROLE", " Admin "),
        ])
        .unwrap();

        assert_eq!(config.sqlite_url, "sqlite::memory:");
        assert_eq!(config.table_dir, PathBuf::from("/srv/tables"));
        assert_eq!(config.weeks_ahead, 4);
        assert_eq!(config.escalation_role, "admin");
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config(&[("SYNC_WEEKS_AHEAD", "two")]),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            config(&[("SYNC_PASS_TIMEOUT_SECS", "0")]),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            config(&[("SYNC_WEEKS_AHEAD", "100000000")]),
            Err(SyncError::Config(_))
        ));
    }
}
