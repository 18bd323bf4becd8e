//! # node-session
//!
//! Server-side sessions for a frontend node.
//!
//! A [`Session`] owns one client connection and runs two tasks for it: a reader
//! that hands inbound bytes to a message handler, and a writer that drains the
//! outbound queue. The [`SessionRegistry`] allocates session ids, tracks which
//! user is bound to which session and fans out lifecycle events.

pub mod error;
pub mod network;
pub mod registry;
pub mod server;
pub mod session;


pub use error::{SessionError, SessionResult};
pub use network::{NetworkEntity, NetworkError};
pub use registry::SessionRegistry;
pub use session::{FrontendId, ListenerFlow, Session, SessionStatus, Settings, Sid, Uid};
