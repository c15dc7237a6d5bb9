use config::{Config, ConfigError, File, FileFormat};
use ethers::types::Address;
use log::debug;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::contracts::DEFAULT_EVENT_NAME;
use crate::error::IndexerError;
use crate::redis_manager::RedisConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Node {
    /// WebSocket endpoint. `http(s)://` is rewritten to `ws(s)://`.
    pub ws_url: String,
    /// Appended as the last path segment (Alchemy/Infura style). Optional for local nodes.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Local nodes (anvil, hardhat) don't need credentials.
    #[serde(default = "default_false")]
    pub allow_anonymous: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Contract {
    pub address: String,
    #[serde(default = "default_abi_path")]
    pub abi_path: String,
    #[serde(default = "default_event_name")]
    pub event_name: String,
    /// First block scanned by backfill on every (re)connection.
    #[serde(default)]
    pub start_block: u64,
}

fn default_abi_path() -> String {
    "abi/Coffee.json".to_string()
}
fn default_event_name() -> String {
    DEFAULT_EVENT_NAME.to_string()
}
fn default_false() -> bool {
    false
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_backfill_chunk_size")]
    pub backfill_chunk_size: u64,
    #[serde(default)]
    pub reconnect: RetryPolicy,
}

fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_backfill_chunk_size() -> u64 {
    2000 // most providers cap eth_getLogs ranges around here
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            backfill_chunk_size: default_backfill_chunk_size(),
            reconnect: RetryPolicy::default(),
        }
    }
}

impl IndexerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
}

fn default_max_connections() -> u32 {
    5
}
fn default_connect_attempts() -> u32 {
    10
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            connect_attempts: default_connect_attempts(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
    #[serde(default = "default_false")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub node: Node,
    pub contract: Contract,
    #[serde(default)]
    pub indexer: IndexerSettings,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub metrics: Metrics,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_path("Config.toml")
    }

    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        let mut settings: Self = s.try_deserialize()?;
        settings.apply_overrides(non_empty_env)?;
        Ok(settings)
    }

    /// Parses settings from an inline TOML document. Env overrides are not applied.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Overrides from the environment (or any `lookup`). A malformed value is an error,
    /// never silently ignored.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MEMO_NODE_WS_URL") {
            self.node.ws_url = v;
        }
        if let Some(v) = lookup("MEMO_NODE_API_KEY").or_else(|| lookup("ALCHEMY_API_KEY")) {
            self.node.api_key = Some(v);
        }
        if let Some(v) = lookup("MEMO_CONTRACT_ADDRESS") {
            self.contract.address = v;
        }
        if let Some(v) = lookup("MEMO_CONTRACT_ABI_PATH") {
            self.contract.abi_path = v;
        }
        if let Some(v) = lookup("MEMO_START_BLOCK") {
            self.contract.start_block = v.parse().map_err(|e| {
                ConfigError::Message(format!("invalid MEMO_START_BLOCK {:?}: {}", v, e))
            })?;
            debug!("MEMO_START_BLOCK override: {}", self.contract.start_block);
        }
        if let Some(v) = lookup("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = lookup("REDIS_URL") {
            self.redis.url = v;
        }
        Ok(())
    }

    /// Startup checks. A failure here is fatal.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.node.api_key.as_deref().map_or(true, str::is_empty) && !self.node.allow_anonymous {
            return Err(IndexerError::Config(
                "node.api_key is missing (set MEMO_NODE_API_KEY or node.allow_anonymous = true)".into(),
            ));
        }
        url::Url::parse(&self.ws_endpoint())
            .map_err(|e| IndexerError::Config(format!("invalid node endpoint: {}", e)))?;
        self.contract_address()?;
        if self.indexer.poll_interval_ms == 0 {
            return Err(IndexerError::Config("indexer.poll_interval_ms must be > 0".into()));
        }
        if self.indexer.backfill_chunk_size == 0 {
            return Err(IndexerError::Config("indexer.backfill_chunk_size must be > 0".into()));
        }
        Ok(())
    }

    pub fn contract_address(&self) -> Result<Address, IndexerError> {
        Address::from_str(self.contract.address.trim()).map_err(|e| {
            IndexerError::Config(format!("invalid contract address {:?}: {}", self.contract.address, e))
        })
    }

    /// Full WebSocket endpoint including credentials. The key is appended unless it is
    /// already the last path segment.
    pub fn ws_endpoint(&self) -> String {
        let base = normalize_ws_url(&self.node.ws_url);
        match self.node.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() && last_path_segment(&base).as_deref() != Some(key) => {
                format!("{}/{}", base.trim_end_matches('/'), key)
            }
            _ => base,
        }
    }
}

fn last_path_segment(endpoint: &str) -> Option<String> {
    let url = url::Url::parse(endpoint).ok()?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    Some(segment.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Converts HTTP URLs to WebSocket URLs; bare `host:port` is assumed to be plain ws.
pub fn normalize_ws_url(provider_url: &str) -> String {
    if let Some(rest) = provider_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = provider_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if provider_url.starts_with("ws://") || provider_url.starts_with("wss://") {
        provider_url.to_string()
    } else {
        format!("ws://{}", provider_url)
    }
}
