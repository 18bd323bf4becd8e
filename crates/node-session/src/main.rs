//! Node gateway entry point
//!
//! Run with:
//! ```bash
//! cargo run -p node-session --bin node-gateway
//! ```
//!
//! Configuration is loaded from environment variables.

use node_common::{try_init_tracing_with_config, NodeConfig, TracingConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Load configuration first so the log format can follow the environment
    let config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = try_init_tracing_with_config(&TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        env = ?config.app.env,
        frontend_id = %config.node.frontend_id,
        addr = %config.gateway.address(),
        "Configuration loaded"
    );

    if let Err(e) = node_session::server::run(config).await {
        error!(error = %e, "Gateway failed");
        std::process::exit(1);
    }
}
