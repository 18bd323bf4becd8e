//! # node-common
//!
//! Shared utilities for a frontend node: configuration loading and telemetry.

pub mod config;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    AppSettings, ConfigError, Environment, NodeConfig, NodeSettings, ServerConfig, SessionConfig,
};
pub use telemetry::{
    init_tracing, try_init_tracing, try_init_tracing_with_config, TracingConfig, TracingError,
};
