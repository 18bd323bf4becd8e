//! Configuration structs

mod app_config;

pub use app_config::{
    AppSettings, ConfigError, Environment, NodeConfig, NodeSettings, ServerConfig, SessionConfig,
};
