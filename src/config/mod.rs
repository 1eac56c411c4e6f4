//! Configuration Module
//!
//! Provides TOML-based configuration with support for:
//! - Logging level
//! - HTTP listener settings
//! - Broker service URL, reply timeout and client names
//! - Metrics endpoint toggle
//! - Environment variable overrides (SHIM__* prefix)

use std::net::SocketAddr;
use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use url::Url;

pub use broker::BrokerConfig;
pub use metrics::MetricsConfig;

mod broker;
mod metrics;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Broker configuration
    pub broker: BrokerConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP bind address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Largest accepted request body in bytes (0 = unlimited)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `SHIM__` prefix with double underscores for nesting:
    ///    - `SHIM__SERVER__BIND=0.0.0.0:9000` overrides `server.bind`
    ///    - `SHIM__BROKER__SERVICE_URL=pulsar://broker:6650` overrides `broker.service_url`
    ///    - `SHIM__BROKER__REPLY_TIMEOUT=30s` overrides `broker.reply_timeout`
    ///
    /// The result is not validated, so command-line overrides can still be
    /// applied; call [`Config::validate`] once they are.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("server.bind", "0.0.0.0:8080")?
            .set_default("server.max_body_size", 10 * 1024 * 1024)?
            .set_default("broker.service_url", "pulsar://localhost:6650")?
            .set_default("broker.reply_timeout", "60s")?
            .set_default("metrics.enabled", true)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("SHIM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(cfg.try_deserialize()?)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let service_url = self.broker.service_url.trim();
        if service_url.is_empty() {
            return Err(ConfigError::Validation(
                "broker.service_url must not be empty".to_string(),
            ));
        }

        let url = Url::parse(service_url).map_err(|e| {
            ConfigError::Validation(format!(
                "broker.service_url '{}' is not a valid URL: {}",
                service_url, e
            ))
        })?;
        if !matches!(url.scheme(), "memory" | "pulsar" | "pulsar+ssl") {
            return Err(ConfigError::Validation(format!(
                "broker.service_url has unknown scheme '{}' (expected pulsar, pulsar+ssl or memory)",
                url.scheme()
            )));
        }

        if self.broker.reply_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "broker.reply_timeout must be greater than zero".to_string(),
            ));
        }

        if self.broker.subscription_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "broker.subscription_name must not be empty".to_string(),
            ));
        }

        if self.broker.producer_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "broker.producer_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
