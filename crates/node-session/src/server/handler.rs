//! Connection handler

use super::TcpPeer;
use crate::error::SessionError;
use crate::registry::SessionRegistry;
use crate::session::Session;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Create a session for an accepted connection and start its tasks
pub fn handle_connection(
    registry: &Arc<SessionRegistry>,
    frontend_id: &str,
    stream: TcpStream,
    remote: SocketAddr,
) -> Arc<Session> {
    let session = registry.create(frontend_id, Arc::new(TcpPeer::new(remote)));

    session.on_message(echo);
    session.on_error(|session, err| {
        warn!(parent: session.span(), error = %err, code = err.error_code(), "session error");
    });

    info!(parent: session.span(), %remote, "connection accepted");

    if let Err(err) = session.start_tcp(stream) {
        warn!(parent: session.span(), error = %err, "failed to start session");
        session.close();
    }

    session
}

/// Queue a copy of the inbound bytes back to the client
fn echo(session: &Session, bytes: &[u8]) -> anyhow::Result<()> {
    match session.try_send(Bytes::copy_from_slice(bytes)) {
        Ok(_) => Ok(()),
        Err(SessionError::QueueFull(_)) => {
            warn!(parent: session.span(), len = bytes.len(), "outbound queue full, echo dropped");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
