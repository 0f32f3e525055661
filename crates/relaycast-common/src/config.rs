//! Configuration for Relaycast

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "RELAYCAST_CONFIG";

/// Environment variable overriding the gateway bot token
pub const BOT_TOKEN_ENV: &str = "RELAYCAST_BOT_TOKEN";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Messaging platform configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Send rate limits
    #[serde(default)]
    pub rate_gate: RateGateConfig,

    /// Dispatch loop tuning
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Job queue consumer
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Messaging platform (bot API) configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bot API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Bot token, appended to the base URL as `/bot<token>/`
    #[serde(default)]
    pub bot_token: String,

    /// Request timeout in seconds
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,

    /// Retry hint used when a 429 response carries none
    #[serde(default = "default_retry_after")]
    pub default_retry_after_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            bot_token: String::new(),
            timeout_secs: default_gateway_timeout(),
            default_retry_after_secs: default_retry_after(),
        }
    }
}

// The token is a credential; keep it out of debug output.
impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("api_base", &self.api_base)
            .field("bot_token", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .field("default_retry_after_secs", &self.default_retry_after_secs)
            .finish()
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_gateway_timeout() -> u64 {
    30
}

fn default_retry_after() -> u64 {
    30
}

/// Send rate limits enforced by the rate gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateGateConfig {
    /// Maximum sends started per window
    #[serde(default = "default_global_limit")]
    pub global_limit: u32,

    /// Fixed window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Minimum spacing between sends to one recipient, in milliseconds
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for RateGateConfig {
    fn default() -> Self {
        Self {
            global_limit: default_global_limit(),
            window_ms: default_window_ms(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

fn default_global_limit() -> u32 {
    30
}

fn default_window_ms() -> u64 {
    1000
}

fn default_cooldown_ms() -> u64 {
    1100
}

/// Dispatch loop tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Re-read campaign status every N processed recipients
    #[serde(default = "default_status_check_interval")]
    pub status_check_interval: u32,

    /// Flush campaign counters every N processed recipients
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u32,

    /// Language of the variant used when no variant matches a subscriber
    #[serde(default = "default_fallback_language")]
    pub fallback_language: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            status_check_interval: default_status_check_interval(),
            flush_interval: default_flush_interval(),
            fallback_language: default_fallback_language(),
        }
    }
}

fn default_status_check_interval() -> u32 {
    20
}

fn default_flush_interval() -> u32 {
    10
}

fn default_fallback_language() -> String {
    "en".to_string()
}

/// Job queue consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Interval between polls for due jobs (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Attempts before a dispatch job is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    /// A `processing` job without a heartbeat for this long is claimed
    /// again (seconds)
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_attempts: default_max_attempts(),
            stale_after_secs: default_stale_after(),
        }
    }
}

fn default_poll_interval() -> u64 {
    5
}

fn default_max_attempts() -> i32 {
    3
}

fn default_stale_after() -> u64 {
    300
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from environment and file
    pub fn load() -> crate::Result<Self> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::load_default_locations()?,
        };

        if let Ok(token) = std::env::var(BOT_TOKEN_ENV) {
            if !token.is_empty() {
                config.gateway.bot_token = token;
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn load_default_locations() -> crate::Result<Self> {
        let paths = [
            PathBuf::from("./relaycast.toml"),
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/relaycast/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                debug!(path = %path.display(), "Loading configuration");
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.gateway.bot_token.trim().is_empty() {
            return Err(crate::Error::Config(format!(
                "gateway.bot_token is required (or set {})",
                BOT_TOKEN_ENV
            )));
        }
        if self.rate_gate.global_limit == 0 || self.rate_gate.window_ms == 0 {
            return Err(crate::Error::Config(
                "rate_gate.global_limit and rate_gate.window_ms must be positive".to_string(),
            ));
        }
        if self.dispatch.status_check_interval == 0 || self.dispatch.flush_interval == 0 {
            return Err(crate::Error::Config(
                "dispatch intervals must be positive".to_string(),
            ));
        }
        if self.queue.max_attempts < 1 {
            return Err(crate::Error::Config(
                "queue.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.queue.stale_after_secs < 3 {
            return Err(crate::Error::Config(
                "queue.stale_after_secs must be at least 3".to_string(),
            ));
        }
        Ok(())
    }
}
