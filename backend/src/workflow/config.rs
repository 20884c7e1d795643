use crate::api::model::ApiSettings;
use crate::generator::GeneratorConfig;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub bind: SocketAddr,
    pub default_limit: usize,
    pub max_limit: usize,
    pub keep_alive_secs: u64,
    /// Changes buffered per feed subscriber before it starts skipping.
    pub change_buffer: usize,
    /// Insert a generated detection this often; unset disables the emitter.
    pub emit_interval_secs: Option<u64>,
    pub generator: GeneratorConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        let api = ApiSettings::default();
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 9000)),
            default_limit: api.default_limit,
            max_limit: api.max_limit,
            keep_alive_secs: api.keep_alive.as_secs(),
            change_buffer: 256,
            emit_interval_secs: None,
            generator: GeneratorConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading backend config {}", path_ref.display()))?;
        let config: BackendConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing backend config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            default_limit: self.default_limit,
            max_limit: self.max_limit.max(1),
            keep_alive: Duration::from_secs(self.keep_alive_secs.max(1)),
        }
    }

    pub fn emit_interval(&self) -> Option<Duration> {
        self.emit_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
