//! Session registry
//!
//! The table of live sessions on one node plus uid binding and lifecycle
//! bookkeeping.

mod registry;

pub use registry::SessionRegistry;
