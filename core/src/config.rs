use crate::prelude::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an optional YAML dashboard config.
pub const CONFIG_ENV: &str = "MINEWATCH_CONFIG";

/// How change-feed events reach the in-memory list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStrategy {
    /// Every event triggers a full re-fetch of list and stats.
    #[default]
    FullRefetch,
    /// The event's record is patched in by id; only stats are re-fetched.
    ApplyChange,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    pub backend_url: String,
    pub poll_interval_secs: u64,
    pub highlight_delay_ms: u64,
    pub recent_count: usize,
    pub list_limit: usize,
    pub refresh_strategy: RefreshStrategy,
    pub stale_after_secs: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    /// External report renderer; the report download is hidden when unset.
    pub report_service_url: Option<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:9000".into(),
            poll_interval_secs: 30,
            highlight_delay_ms: 2500,
            recent_count: 4,
            list_limit: 100,
            refresh_strategy: RefreshStrategy::FullRefetch,
            stale_after_secs: 90,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            report_service_url: None,
        }
    }
}

impl DashboardConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            CoreError::Config(format!("reading {}: {}", path_ref.display(), err))
        })?;
        serde_yaml::from_str(&contents).map_err(|err| {
            CoreError::Config(format!("parsing {}: {}", path_ref.display(), err))
        })
    }

    /// Loads the file named by `MINEWATCH_CONFIG`, or the defaults when unset.
    pub fn from_env() -> CoreResult<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn highlight_delay(&self) -> Duration {
        Duration::from_millis(self.highlight_delay_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms.max(1))
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms.max(self.reconnect_delay_ms).max(1))
    }
}
