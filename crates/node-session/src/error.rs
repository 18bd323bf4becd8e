//! Session error types

use crate::network::NetworkError;
use crate::session::{SessionStatus, Sid, Uid};
use std::io;
use thiserror::Error;

/// Errors raised by sessions and the session registry
#[derive(Debug, Error)]
pub enum SessionError {
    /// Bind was called with a uid below 1
    #[error("Illegal uid: {0}")]
    IllegalUid(Uid),

    /// Another live session already holds this uid
    #[error("Uid {uid} is already bound to session {sid}")]
    UidAlreadyBound { uid: Uid, sid: Sid },

    #[error("Session not found: {0}")]
    SessionNotFound(Sid),

    #[error("Session {0} is closed")]
    SessionClosed(Sid),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Session {0} already started")]
    AlreadyStarted(Sid),

    #[error("Outbound queue of session {0} is full")]
    QueueFull(Sid),

    /// Reading from the connection failed
    #[error("Transport read failed: {0}")]
    TransportRead(#[source] io::Error),

    /// Writing to the connection failed
    #[error("Transport write failed: {0}")]
    TransportWrite(#[source] io::Error),

    /// The message handler rejected inbound bytes
    #[error("Message dispatch failed: {0}")]
    Dispatch(#[source] anyhow::Error),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl SessionError {
    /// Stable error code for logs and metrics
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::IllegalUid(_) => "ILLEGAL_UID",
            Self::UidAlreadyBound { .. } => "UID_ALREADY_BOUND",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionClosed(_) => "SESSION_CLOSED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::AlreadyStarted(_) => "ALREADY_STARTED",
            Self::QueueFull(_) => "QUEUE_FULL",
            Self::TransportRead(_) => "TRANSPORT_READ",
            Self::TransportWrite(_) => "TRANSPORT_WRITE",
            Self::Dispatch(_) => "DISPATCH_FAILURE",
            Self::Network(_) => "NETWORK_ERROR",
        }
    }

    /// Whether this error ends the session it occurred on
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TransportRead(_) | Self::TransportWrite(_) | Self::Dispatch(_)
        )
    }
}

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;
