//! Lifecycle listeners and the message handler
//!
//! Listeners run in registration order. Create and close chains stop at the
//! first listener returning [`ListenerFlow::Stop`]; error, bind and unbind
//! listeners always all run. A panicking listener is logged and skipped so
//! that the caller's cleanup still completes.

use super::{Session, Sid, Uid};
use crate::error::SessionError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Whether a listener chain should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerFlow {
    Continue,
    Stop,
}

impl From<bool> for ListenerFlow {
    fn from(proceed: bool) -> Self {
        if proceed {
            Self::Continue
        } else {
            Self::Stop
        }
    }
}

/// Create/close listener
pub type SessionListener = Arc<dyn Fn(&Session) -> ListenerFlow + Send + Sync>;

/// Error listener, invoked with the error that is about to end the session
pub type ErrorListener = Arc<dyn Fn(&Session, &SessionError) + Send + Sync>;

/// Bind/unbind listener, invoked with the uid concerned
pub type BindListener = Arc<dyn Fn(&Session, Uid) + Send + Sync>;

/// Message handler, invoked on the reader task with exactly the bytes of one read.
///
/// The slice is only valid for the duration of the call; the read buffer is
/// reused afterwards. A slow handler stalls reading for its session.
pub type MessageHandler = Arc<dyn Fn(&Session, &[u8]) -> anyhow::Result<()> + Send + Sync>;

/// Run `f`, converting a panic into `None`
pub(crate) fn guarded<T>(chain: &'static str, sid: Sid, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!(sid, chain, "listener panicked");
            None
        }
    }
}

/// Run a create/close chain, returning how many listeners were invoked
pub(crate) fn run_chain(
    chain: &'static str,
    listeners: &[SessionListener],
    session: &Session,
) -> usize {
    let mut invoked = 0;

    for listener in listeners {
        invoked += 1;
        if guarded(chain, session.sid(), || listener(session)) == Some(ListenerFlow::Stop) {
            tracing::debug!(sid = session.sid(), chain, invoked, "listener chain stopped");
            break;
        }
    }

    invoked
}
