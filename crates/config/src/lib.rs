//! Configuration loading and validation for orderdesk.
//!
//! Loads configuration from `~/.orderdesk/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.orderdesk/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language-model endpoint
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Background job execution
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Real-time channel and subscription tokens
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Order store
    #[serde(default)]
    pub store: StoreConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Per-request timeout for model calls
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on model round-trips per job
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.2
}
fn default_max_steps() -> usize {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_steps: default_max_steps(),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Jobs processed concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Pending jobs held before submissions are refused
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Attempts per step, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    256
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_ai")]
    pub channel: String,

    #[serde(default = "default_ai")]
    pub topic: String,

    /// Subscription token lifetime
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// HMAC key for subscription tokens. Generated per process when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret: Option<String>,

    /// Snapshots buffered per topic before slow subscribers lag
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

fn default_ai() -> String {
    "ai".into()
}
fn default_token_ttl_secs() -> u64 {
    60
}
fn default_broadcast_capacity() -> usize {
    64
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel: default_ai(),
            topic: default_ai(),
            token_ttl_secs: default_token_ttl_secs(),
            token_secret: None,
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("channel", &self.channel)
            .field("topic", &self.topic)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("token_secret", &redact(&self.token_secret))
            .field("broadcast_capacity", &self.broadcast_capacity)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// CORS origins; empty allows any
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    8288
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `sqlite://…` for the SQL store, `memory` for an in-process map
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// JSON file of orders loaded at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<PathBuf>,
}

fn default_database_url() -> String {
    "sqlite://orders.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            seed_file: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.orderdesk/config.toml).
    ///
    /// Environment overrides:
    /// - `ORDERDESK_API_KEY`, then `OPENAI_API_KEY` (only when the file sets none)
    /// - `ORDERDESK_BASE_URL`
    /// - `ORDERDESK_MODEL`
    /// - `ORDERDESK_TOKEN_SECRET`
    /// - `ORDERDESK_DATABASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = lookup("ORDERDESK_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(url) = lookup("ORDERDESK_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(model) = lookup("ORDERDESK_MODEL") {
            self.provider.model = model;
        }
        if let Some(secret) = lookup("ORDERDESK_TOKEN_SECRET") {
            self.realtime.token_secret = Some(secret);
        }
        if let Some(url) = lookup("ORDERDESK_DATABASE_URL") {
            self.store.database_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".orderdesk")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError("agent.max_steps must be >= 1".into()));
        }
        if self.executor.workers == 0 || self.executor.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "executor.workers and executor.queue_capacity must be >= 1".into(),
            ));
        }
        if self.executor.max_attempts == 0 {
            return Err(ConfigError::ValidationError("executor.max_attempts must be >= 1".into()));
        }
        if self.executor.initial_backoff_ms > self.executor.max_backoff_ms {
            return Err(ConfigError::ValidationError(
                "executor.initial_backoff_ms must not exceed executor.max_backoff_ms".into(),
            ));
        }
        if self.realtime.channel.is_empty() || self.realtime.topic.is_empty() {
            return Err(ConfigError::ValidationError(
                "realtime.channel and realtime.topic must be non-empty".into(),
            ));
        }
        if self.realtime.token_ttl_secs == 0 {
            return Err(ConfigError::ValidationError("realtime.token_ttl_secs must be >= 1".into()));
        }
        if self.realtime.broadcast_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "realtime.broadcast_capacity must be >= 1".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for orderdesk_core::Error {
    fn from(e: ConfigError) -> Self {
        orderdesk_core::Error::Config { message: e.to_string() }
    }
}
