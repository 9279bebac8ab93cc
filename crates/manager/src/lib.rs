//! # emuprot manager API
//!
//! The administrative HTTP API over emuDB projects: listings, git history,
//! tagging, bundle-list administration and database configuration. All
//! domain logic lives in `emuprot-core`; this crate adds validation,
//! authentication/authorization, and the HTTP envelope.

pub mod dispatch;
pub mod handlers;
pub mod http;
pub mod validate;

pub use dispatch::ManagerEnv;
pub use http::ManagerServer;
