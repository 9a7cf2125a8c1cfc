//! Server configuration, read from `tally.toml` and `TALLY_*` variables.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use chrono::TimeDelta;
use serde::Deserialize;
use tally_engine::{AnalyticsConfig, IngestConfig};
use tally_store_sqlite::ConnectionConfig;

/// Runtime configuration. Every field has a default, so an absent file is
/// a valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:                String,
  pub port:                u16,
  pub store_path:          PathBuf,
  pub logs_dir:            PathBuf,
  pub settings_path:       PathBuf,
  /// Cross-session notification bus database. Unset disables bus pulls.
  pub bus_db_path:         Option<PathBuf>,
  pub stale_after_minutes: i64,
  /// Zero scans every file on each pass.
  pub lookback_days:       i64,
  pub parse_workers:       usize,
  pub read_connections:    usize,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:                "127.0.0.1".to_string(),
      port:                7345,
      store_path:          PathBuf::from("~/.claude/contrib/analytics/data.db"),
      logs_dir:            PathBuf::from("~/.claude/projects"),
      settings_path:       PathBuf::from("~/.claude/settings.json"),
      bus_db_path:         None,
      stale_after_minutes: 5,
      lookback_days:       7,
      parse_workers:       4,
      read_connections:    4,
    }
  }
}

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  pub fn store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }

  pub fn bus_db_path(&self) -> Option<PathBuf> { self.bus_db_path.as_deref().map(expand_tilde) }

  pub fn connection_config(&self) -> ConnectionConfig {
    ConnectionConfig {
      read_connections: self.read_connections,
      ..ConnectionConfig::default()
    }
  }

  pub fn analytics_config(&self) -> AnalyticsConfig {
    AnalyticsConfig {
      ingest: IngestConfig {
        logs_dir:      expand_tilde(&self.logs_dir),
        lookback_days: (self.lookback_days > 0).then_some(self.lookback_days),
        stale_after:   TimeDelta::minutes(self.stale_after_minutes.max(0)),
        parse_workers: self.parse_workers.max(1),
      },
      settings_path: expand_tilde(&self.settings_path),
      ..AnalyticsConfig::default()
    }
  }

  /// Background bus pull period; follows the staleness window.
  pub fn bus_interval(&self) -> Duration {
    Duration::from_secs(60 * self.stale_after_minutes.max(1) as u64)
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
