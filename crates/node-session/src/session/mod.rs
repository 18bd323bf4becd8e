//! Session management
//!
//! A session is the server-side handle of one client connection: its identity,
//! status, attached settings, outbound queue and lifecycle listeners.

mod listener;
mod session;
mod settings;
mod state;
mod tasks;

pub use listener::{BindListener, ErrorListener, ListenerFlow, MessageHandler, SessionListener};
pub use session::Session;
pub use settings::Settings;
pub use state::SessionStatus;

pub(crate) use listener::{guarded, run_chain};

/// Session identifier, unique for the lifetime of the process
pub type Sid = i64;

/// User identity bound to a session; 0 means unbound
pub type Uid = i64;

/// Identifier of the node terminating the physical connection
pub type FrontendId = String;
