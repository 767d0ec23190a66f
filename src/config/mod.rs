//! Application configuration.
//!
//! Loaded from YAML files and environment variables:
//!
//! ```yaml
//! server:
//!   port: 8080
//! nats:
//!   url: nats://nats:4222
//!   stream:
//!     name: FINDINGS
//!     subjects: ["findings.>"]
//! redis:
//!   url: redis://redis:6379
//! forwarder:
//!   quorum_size: 2
//!   routing_path: /etc/forwarder/routing.yaml
//!   source: forwarder-eu-1
//!   block_explorer: https://etherscan.io
//!   http_timeout_secs: 10
//! ```
//!
//! Any value can be overridden with `FORWARDER__<SECTION>__<KEY>`, e.g.
//! `FORWARDER__FORWARDER__QUORUM_SIZE=3`.

mod server;

pub use server::ServerConfig;

use std::time::Duration;

use serde::Deserialize;

use crate::bus::StreamSettings;
use crate::sender::{ChannelEndpoints, MAX_REQUEST_TIMEOUT, OPSGENIE_API_URL, TELEGRAM_API_URL};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "FORWARDER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "FORWARDER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "FORWARDER_LOG";
/// Environment variable selecting the log output format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "FORWARDER_LOG_FORMAT";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// NATS connection and stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    pub stream: StreamSettings,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            stream: StreamSettings::default(),
        }
    }
}

/// Coordination store connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Forwarding behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Observations required before a quorum consumer sends.
    pub quorum_size: u32,
    /// Routing table file.
    pub routing_path: String,
    /// Name shown as `Source:` in every message.
    pub source: String,
    /// Block explorer base URL for block and tx links.
    pub block_explorer: String,
    /// Per-request timeout for channel APIs, at most 10 seconds.
    pub http_timeout_secs: u64,
    pub telegram_api_url: String,
    pub opsgenie_api_url: String,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            quorum_size: 1,
            routing_path: "routing.yaml".to_string(),
            source: "finding-forwarder".to_string(),
            block_explorer: "https://etherscan.io".to_string(),
            http_timeout_secs: MAX_REQUEST_TIMEOUT.as_secs(),
            telegram_api_url: TELEGRAM_API_URL.to_string(),
            opsgenie_api_url: OPSGENIE_API_URL.to_string(),
        }
    }
}

impl ForwarderConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn endpoints(&self) -> ChannelEndpoints {
        ChannelEndpoints {
            telegram_api_url: self.telegram_api_url.trim_end_matches('/').to_string(),
            opsgenie_api_url: self.opsgenie_api_url.clone(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub nats: NatsConfig,
    pub redis: RedisConfig,
    pub forwarder: ForwarderConfig,
}

impl Config {
    /// Load and validate configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("nats.stream.subjects")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let forwarder = &self.forwarder;
        if forwarder.quorum_size < 1 {
            return Err(ConfigError::Invalid(
                "forwarder.quorum_size must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_REQUEST_TIMEOUT.as_secs()).contains(&forwarder.http_timeout_secs) {
            return Err(ConfigError::Invalid(format!(
                "forwarder.http_timeout_secs must be between 1 and {}",
                MAX_REQUEST_TIMEOUT.as_secs()
            )));
        }
        if forwarder.routing_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "forwarder.routing_path must be set".to_string(),
            ));
        }
        if self.nats.stream.name.trim().is_empty() || self.nats.stream.subjects.is_empty() {
            return Err(ConfigError::Invalid(
                "nats.stream needs a name and at least one subject".to_string(),
            ));
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
