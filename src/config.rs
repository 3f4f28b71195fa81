use std::path::Path;

use serde::Deserialize;

use crate::plans::{DEFAULT_HISTORY_CAPACITY, DEFAULT_STEP_MAX_ATTEMPTS};
use crate::triggers::DEFAULT_POLL_INTERVAL_MS;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {}", path.display(), e))?;
        let config: AppConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("cannot parse config {}: {}", path.display(), e))?;
        Ok(config)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Default capability-call ceiling for new plans.
    #[serde(default = "default_api_calls_max")]
    pub api_calls_max: u32,
    /// Default per-step attempt ceiling.
    #[serde(default = "default_step_max_attempts")]
    pub step_max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_calls_max: default_api_calls_max(),
            step_max_attempts: default_step_max_attempts(),
        }
    }
}

fn default_api_calls_max() -> u32 {
    25
}

fn default_step_max_attempts() -> u32 {
    DEFAULT_STEP_MAX_ATTEMPTS
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
    /// SQLite database for the persistent sink; in-memory only when unset.
    #[serde(default)]
    pub database_path: Option<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
            database_path: None,
        }
    }
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}
