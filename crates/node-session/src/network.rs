//! Network entity collaborator
//!
//! The transport-facing object a session forwards codec-level operations to.
//! Routes and payloads pass through untouched.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors returned by a [`NetworkEntity`]
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Network I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Network entity closed")]
    Closed,

    /// The session has no network entity attached
    #[error("No network entity attached")]
    Detached,

    /// The entity cannot perform this operation
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The remote side reported a failure
    #[error("Remote error: {0}")]
    Remote(String),
}

/// Connection-level operations a session delegates to
#[async_trait]
pub trait NetworkEntity: Send + Sync {
    /// Write already-encoded bytes to the client
    async fn send_raw(&self, payload: Bytes) -> Result<(), NetworkError>;

    /// Forward a call to a remote node
    async fn rpc(&self, route: &str, payload: Bytes) -> Result<(), NetworkError>;

    /// Push a message to the client
    async fn push(&self, route: &str, payload: Bytes) -> Result<(), NetworkError>;

    /// Answer the client request identified by `mid`
    async fn response(&self, mid: u64, payload: Bytes) -> Result<(), NetworkError>;

    /// Tell the client it is being disconnected
    async fn kick(&self, reason: &str) -> Result<(), NetworkError>;

    /// Release the underlying connection. Called once per session.
    fn close(&self);

    fn remote_addr(&self) -> Option<SocketAddr>;
}
