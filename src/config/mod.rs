//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod broker;
mod server;

pub use broker::{BrokerConfig, DEFAULT_SUBJECT_PREFIX};
pub use server::{ServerConfig, DEFAULT_CORRELATION_HEADER};

use std::collections::HashSet;

use serde::Deserialize;

use crate::broker::StreamSpec;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "GATEWAY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "GATEWAY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "GATEWAY_LOG";

/// Legacy flat variable for the broker URL.
pub const NATS_URL_ENV_VAR: &str = "NATS_URL";
/// Legacy flat variable for the HTTP port.
pub const PORT_ENV_VAR: &str = "PORT";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(from = "RawConfig")]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Broker connection configuration.
    pub broker: BrokerConfig,
    /// Streams ensured at startup.
    ///
    /// When none are declared, a single stream capturing
    /// `<broker.subject_prefix>.*` is used.
    pub streams: Vec<StreamSpec>,
}

/// Configuration as written, before defaults that depend on other fields.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    server: ServerConfig,
    broker: BrokerConfig,
    streams: Option<Vec<StreamSpec>>,
}

impl From<RawConfig> for Config {
    fn from(raw: RawConfig) -> Self {
        let streams = raw
            .streams
            .unwrap_or_else(|| vec![StreamSpec::raw_events(&raw.broker.subject_prefix)]);
        Self {
            server: raw.server,
            broker: raw.broker,
            streams,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. `NATS_URL` / `PORT`, unless the prefixed equivalent is set
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

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        if std::env::var(format!("{CONFIG_ENV_PREFIX}__BROKER__URL")).is_err() {
            builder = builder.set_override_option("broker.url", std::env::var(NATS_URL_ENV_VAR).ok())?;
        }
        if std::env::var(format!("{CONFIG_ENV_PREFIX}__SERVER__PORT")).is_err() {
            builder = builder.set_override_option("server.port", std::env::var(PORT_ENV_VAR).ok())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.url.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.url must not be empty".to_string()));
        }
        if self.broker.publish_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "broker.publish_timeout_ms must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for stream in &self.streams {
            if stream.subjects.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "stream '{}' declares no subjects",
                    stream.name
                )));
            }
            if !seen.insert(stream.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "stream '{}' declared more than once",
                    stream.name
                )));
            }
        }

        if !self.streams.is_empty() {
            let sample = format!("{}.facebook", self.broker.subject_prefix);
            if !self.streams.iter().any(|s| s.captures(&sample)) {
                return Err(ConfigError::Invalid(format!(
                    "no stream captures subjects under '{}'",
                    self.broker.subject_prefix
                )));
            }
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}
