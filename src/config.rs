use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::push::EXPO_PUSH_URL;

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database written by the ingestion service
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./enviro.db")
}

#[derive(Debug, Clone, PartialEq, Default, serde::Deserialize)]
pub struct Config {
    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,
    /// Falls back to `EXPO_ACCESS_TOKEN` when absent
    pub access_token: Option<String>,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_in_flight_batches")]
    pub max_in_flight_batches: usize,
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            access_token: None,
            max_batch_size: default_max_batch_size(),
            max_in_flight_batches: default_max_in_flight_batches(),
            timeout_secs: default_gateway_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Configured token, or the one from the environment.
    pub fn resolve_access_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .or_else(crate::util::get_access_token)
    }
}

fn default_gateway_url() -> String {
    EXPO_PUSH_URL.to_string()
}

fn default_max_batch_size() -> usize {
    100
}

fn default_max_in_flight_batches() -> usize {
    1
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_store_timeout_secs")]
    pub store_timeout_secs: u64,
    #[serde(default = "default_fan_out_page_size")]
    pub fan_out_page_size: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            store_timeout_secs: default_store_timeout_secs(),
            fan_out_page_size: default_fan_out_page_size(),
        }
    }
}

impl EvaluationConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}

fn default_store_timeout_secs() -> u64 {
    5
}

fn default_fan_out_page_size() -> usize {
    500
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            batch_limit: default_batch_limit(),
        }
    }
}

fn default_interval() -> u64 {
    15
}

fn default_batch_limit() -> usize {
    100
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
