//! Session status state machine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Session status
///
/// `Init -> WaitAck -> Working` is driven by the application handshake and
/// `WaitAck <-> Working` may cycle. `Closed` is terminal and only reachable
/// through the close path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionStatus {
    /// Connection accepted, no handshake yet
    Init = 0,
    /// Handshake sent, waiting for the client to acknowledge
    WaitAck = 1,
    /// Handshake complete
    Working = 2,
    /// Session closed
    Closed = 3,
}

impl SessionStatus {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Init,
            1 => Self::WaitAck,
            2 => Self::Working,
            _ => Self::Closed,
        }
    }

    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether the application may move a session from `self` to `next`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Closed, _) | (_, Self::Closed) => false,
            (Self::Init, Self::Init) => true,
            (_, Self::Init) => false,
            _ => true,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "Init",
            Self::WaitAck => "WaitAck",
            Self::Working => "Working",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Lock-free status cell shared by the session's tasks and callers
#[derive(Debug)]
pub(crate) struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    pub(crate) const fn new() -> Self {
        Self(AtomicU8::new(SessionStatus::Init as u8))
    }

    pub(crate) fn load(&self) -> SessionStatus {
        SessionStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Apply an application transition.
    ///
    /// Returns the previous status, or the current one if the move is not allowed.
    pub(crate) fn transition(&self, next: SessionStatus) -> Result<SessionStatus, SessionStatus> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                SessionStatus::from_u8(current)
                    .can_transition_to(next)
                    .then_some(next as u8)
            })
            .map(SessionStatus::from_u8)
            .map_err(SessionStatus::from_u8)
    }

    /// Move to `Closed`. Only the first caller gets `true`.
    pub(crate) fn close(&self) -> bool {
        self.0.swap(SessionStatus::Closed as u8, Ordering::AcqRel) != SessionStatus::Closed as u8
    }
}
