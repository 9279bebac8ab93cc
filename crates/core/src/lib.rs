//! # emuprot core
//!
//! Domain logic for serving emuDB speech databases:
//! - the emuDB directory conventions and data model
//! - filesystem traversal (databases, sessions, bundles, bundle lists,
//!   uploads, downloads)
//! - git versioning of database directories
//! - advisory locking of projects and databases
//! - authentication and authorization seams
//!
//! **No transport concerns**: the WebSocket protocol server and the manager
//! HTTP API live in their own crates and call into this one.

pub mod auth;
pub mod bundle_list;
pub mod config;
pub mod dbconfig;
pub mod error;
pub mod git;
pub mod lock;
pub mod model;
pub mod paths;
pub mod traversal;

pub use config::ServerConfig;
pub use dbconfig::DbConfig;
pub use error::{EmuError, EmuResult};
pub use git::{CommitAuthor, GitService};
pub use lock::{LockId, LockManager};
