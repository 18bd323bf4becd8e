//! Network entity for a raw TCP client

use crate::network::{NetworkEntity, NetworkError};
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// TCP client without a message codec.
///
/// The session's writer task owns the socket, so codec-level operations are
/// unsupported and kicking only records the reason.
#[derive(Debug)]
pub struct TcpPeer {
    remote: SocketAddr,
    closed: AtomicBool,
}

impl TcpPeer {
    #[must_use]
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            remote,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl NetworkEntity for TcpPeer {
    async fn send_raw(&self, _payload: Bytes) -> Result<(), NetworkError> {
        Err(NetworkError::Unsupported("send_raw"))
    }

    async fn rpc(&self, _route: &str, _payload: Bytes) -> Result<(), NetworkError> {
        Err(NetworkError::Unsupported("rpc"))
    }

    async fn push(&self, _route: &str, _payload: Bytes) -> Result<(), NetworkError> {
        Err(NetworkError::Unsupported("push"))
    }

    async fn response(&self, _mid: u64, _payload: Bytes) -> Result<(), NetworkError> {
        Err(NetworkError::Unsupported("response"))
    }

    async fn kick(&self, reason: &str) -> Result<(), NetworkError> {
        if self.is_closed() {
            return Err(NetworkError::Closed);
        }

        info!(remote = %self.remote, reason, "kicking peer");
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(remote = %self.remote, "peer released");
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }
}
