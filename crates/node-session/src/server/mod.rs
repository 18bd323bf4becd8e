//! Gateway server
//!
//! Accepts TCP connections and runs one registry-managed session per
//! connection. Byte payloads are echoed back; no wire format is imposed.

mod handler;
mod peer;

pub use handler::handle_connection;
pub use peer::TcpPeer;

use crate::registry::SessionRegistry;
use crate::session::FrontendId;
use futures::future::join_all;
use node_common::NodeConfig;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Pause after a failed accept so a persistent error does not spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Upper bound on waiting for session cleanup at shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that stop the gateway from serving
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Accept connections on `listener` until `shutdown` resolves, then close every
/// session and wait (up to a bound) for their cleanup to finish
pub async fn serve<F>(
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    frontend_id: FrontendId,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    handle_connection(&registry, &frontend_id, stream, remote);
                }
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    drop(listener);

    let sessions = registry.sessions();
    let closed = registry.close_all();
    let drained = join_all(sessions.iter().map(|session| session.wait_closed()));
    if tokio::time::timeout(DRAIN_TIMEOUT, drained).await.is_err() {
        warn!(pending = registry.len(), "timed out waiting for sessions to close");
    }

    info!(closed, "gateway stopped");
}

/// Run the gateway with configuration until Ctrl-C
pub async fn run(config: NodeConfig) -> Result<(), ServerError> {
    let addr = config.gateway.address();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!(%addr, frontend_id = %config.node.frontend_id, "gateway listening");

    let registry = SessionRegistry::new_shared(config.session);
    serve(listener, registry, config.node.frontend_id, shutdown_signal()).await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }

    info!("shutdown signal received");
}
