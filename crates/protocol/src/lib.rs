//! # emuprot protocol server
//!
//! The EMU-webApp websocket protocol over axum WebSockets: per-connection
//! session state, authorization gating, a pluggable handler set and the
//! bundle read/save commands.
//!
//! **No administrative concerns**: the manager HTTP API lives in its own
//! crate.

pub mod handlers;
pub mod message;
pub mod plugins;
pub mod server;
pub mod session;

pub use handlers::{DefaultHandlers, HandlerSet};
pub use server::ProtocolServer;
pub use session::{ConnectionContext, ServerEnv, Session};
