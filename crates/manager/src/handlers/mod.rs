//! Query handlers, one module per subject area.
//!
//! Handlers receive already-authenticated, already-authorized, already-valid
//! input. Mutating handlers follow the same pipeline: take the lock, verify
//! the target is tracked by git, mutate the working tree, stage, commit, and
//! release the lock on every exit path.

pub mod bundle_lists;
pub mod database;
pub mod history;
pub mod project;

use emuprot_core::auth::User;
use emuprot_core::CommitAuthor;

pub(crate) fn commit_author(user: &User) -> CommitAuthor {
    let email = if user.email.is_empty() {
        format!("{}@localhost", user.username)
    } else {
        user.email.clone()
    };
    CommitAuthor {
        name: user.username.clone(),
        email,
    }
}
