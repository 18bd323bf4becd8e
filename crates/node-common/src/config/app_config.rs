//! Node configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file if present).

use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Main node configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub app: AppSettings,
    pub node: NodeSettings,
    pub gateway: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// Identity of this node inside the cluster
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSettings {
    /// Identifier of the frontend node terminating client connections
    #[serde(default = "default_frontend_id")]
    pub frontend_id: String,
}

/// Listener configuration for the gateway
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-session I/O tuning
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Size in bytes of the reusable buffer each reader loop reads into
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Capacity of the outbound queue; `send` waits while it is full
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
    /// Consecutive zero-byte reads tolerated before the peer is treated as gone
    #[serde(default = "default_max_empty_reads")]
    pub max_empty_reads: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: default_read_buffer_size(),
            send_queue_capacity: default_send_queue_capacity(),
            max_empty_reads: default_max_empty_reads(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "node-gateway".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_frontend_id() -> String {
    "node-1".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3250
}

fn default_read_buffer_size() -> usize {
    4096
}

fn default_send_queue_capacity() -> usize {
    16
}

fn default_max_empty_reads() -> u32 {
    1
}

impl NodeConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable is set but cannot be parsed, or a size is zero
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let env = match lookup("APP_ENV") {
            Some(raw) => Environment::parse(&raw)
                .ok_or(ConfigError::InvalidValue("APP_ENV", raw))?,
            None => default_env(),
        };

        let session = SessionConfig {
            read_buffer_size: parse_var(&lookup, "SESSION_READ_BUFFER_SIZE")?
                .unwrap_or_else(default_read_buffer_size),
            send_queue_capacity: parse_var(&lookup, "SESSION_SEND_QUEUE_CAPACITY")?
                .unwrap_or_else(default_send_queue_capacity),
            max_empty_reads: parse_var(&lookup, "SESSION_MAX_EMPTY_READS")?
                .unwrap_or_else(default_max_empty_reads),
        };
        session.validate()?;

        Ok(Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env,
            },
            node: NodeSettings {
                frontend_id: lookup("NODE_ID").unwrap_or_else(default_frontend_id),
            },
            gateway: ServerConfig {
                host: lookup("GATEWAY_HOST").unwrap_or_else(default_host),
                port: parse_var(&lookup, "GATEWAY_PORT")?.unwrap_or_else(default_port),
            },
            session,
        })
    }
}

impl SessionConfig {
    /// Reject settings that would stall or spin a session
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buffer_size == 0 {
            return Err(ConfigError::InvalidValue("SESSION_READ_BUFFER_SIZE", "0".into()));
        }
        if self.send_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("SESSION_SEND_QUEUE_CAPACITY", "0".into()));
        }
        if self.max_empty_reads == 0 {
            return Err(ConfigError::InvalidValue("SESSION_MAX_EMPTY_READS", "0".into()));
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        None => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
