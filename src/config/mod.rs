//! Configuration Module
//!
//! TOML-based configuration for TrieMQ with support for:
//! - Listener settings (publisher/subscriber bind addresses, backlogs)
//! - Protocol limits (inline/multibulk/bulk sizes, buffer capacities)
//! - Logging (level, optional log file)
//! - PID file
//! - Environment variable overrides (TRIEMQ__* prefix)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

use crate::broker::BrokerConfig;


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
    /// Listener configuration
    pub server: ServerConfig,
    /// Protocol and buffer limits
    pub limits: LimitsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path; stdout when unset
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Publisher port bind address
    #[serde(default = "default_pub_bind")]
    pub pub_bind: SocketAddr,
    /// Subscriber port bind address
    #[serde(default = "default_sub_bind")]
    pub sub_bind: SocketAddr,
    /// Publisher listening socket backlog
    #[serde(default = "default_backlog")]
    pub pub_backlog: i32,
    /// Subscriber listening socket backlog
    #[serde(default = "default_backlog")]
    pub sub_backlog: i32,
    /// PID file path; not written when unset
    pub pid_file: Option<PathBuf>,
}

fn default_pub_bind() -> SocketAddr {
    "0.0.0.0:5561".parse().unwrap()
}

fn default_sub_bind() -> SocketAddr {
    "0.0.0.0:5562".parse().unwrap()
}

fn default_backlog() -> i32 {
    511
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            pub_bind: default_pub_bind(),
            sub_bind: default_sub_bind(),
            pub_backlog: default_backlog(),
            sub_backlog: default_backlog(),
            pid_file: None,
        }
    }
}

/// Protocol and buffer limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Bytes reserved per socket read
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// Maximum inline request length
    #[serde(default = "default_max_inline_len")]
    pub max_inline_len: usize,
    /// Maximum multibulk element count
    #[serde(default = "default_max_multibulk_len")]
    pub max_multibulk_len: usize,
    /// Maximum single bulk length
    #[serde(default = "default_max_bulk_len")]
    pub max_bulk_len: usize,
    /// Fixed capacity of each subscriber's outbound buffer
    #[serde(default = "default_outbound_buffer_size")]
    pub outbound_buffer_size: usize,
}

fn default_read_chunk_size() -> usize {
    4096
}

fn default_max_inline_len() -> usize {
    crate::codec::DEFAULT_MAX_INLINE
}

fn default_max_multibulk_len() -> usize {
    crate::codec::DEFAULT_MAX_MULTIBULK
}

fn default_max_bulk_len() -> usize {
    crate::codec::DEFAULT_MAX_BULK
}

fn default_outbound_buffer_size() -> usize {
    256 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: default_read_chunk_size(),
            max_inline_len: default_max_inline_len(),
            max_multibulk_len: default_max_multibulk_len(),
            max_bulk_len: default_max_bulk_len(),
            outbound_buffer_size: default_outbound_buffer_size(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable
    /// overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `TRIEMQ__` prefix with double underscores for nesting:
    ///    - `TRIEMQ__SERVER__SUB_BIND=0.0.0.0:6562` overrides `server.sub_bind`
    ///    - `TRIEMQ__LIMITS__MAX_BULK_LEN=4096` overrides `limits.max_bulk_len`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("server.pub_bind", "0.0.0.0:5561")?
            .set_default("server.sub_bind", "0.0.0.0:5562")?
            .set_default("server.pub_backlog", 511)?
            .set_default("server.sub_backlog", 511)?
            .set_default("limits.read_chunk_size", 4096)?
            .set_default("limits.max_inline_len", 64 * 1024)?
            .set_default("limits.max_multibulk_len", 1024)?
            .set_default("limits.max_bulk_len", 1024 * 1024)?
            .set_default("limits.outbound_buffer_size", 256 * 1024)?;

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

        // Override with environment variables (TRIEMQ__SERVER__SUB_BIND, etc.)
        let cfg = builder
            .add_source(
                Environment::with_prefix("TRIEMQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.pub_bind == self.server.sub_bind {
            return Err(ConfigError::Validation(
                "publisher and subscriber ports must differ".to_string(),
            ));
        }
        if self.server.pub_backlog <= 0 || self.server.sub_backlog <= 0 {
            return Err(ConfigError::Validation(
                "listener backlog must be positive".to_string(),
            ));
        }
        if self.limits.read_chunk_size == 0 {
            return Err(ConfigError::Validation(
                "read_chunk_size must be positive".to_string(),
            ));
        }
        if self.limits.max_inline_len == 0
            || self.limits.max_multibulk_len == 0
            || self.limits.max_bulk_len == 0
        {
            return Err(ConfigError::Validation(
                "protocol limits must be positive".to_string(),
            ));
        }
        if self.limits.outbound_buffer_size == 0 {
            return Err(ConfigError::Validation(
                "outbound_buffer_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Project the loaded configuration onto the broker's settings.
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            pub_bind: self.server.pub_bind,
            sub_bind: self.server.sub_bind,
            pub_backlog: self.server.pub_backlog,
            sub_backlog: self.server.sub_backlog,
            read_chunk_size: self.limits.read_chunk_size,
            max_inline_len: self.limits.max_inline_len,
            max_multibulk_len: self.limits.max_multibulk_len,
            max_bulk_len: self.limits.max_bulk_len,
            outbound_buffer_size: self.limits.outbound_buffer_size,
        }
    }
}
