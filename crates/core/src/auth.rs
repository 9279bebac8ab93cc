//! Authentication and authorization seams.
//!
//! The servers only ever talk to the traits in this module; the concrete user
//! store is injected at startup. [`StaticDirectory`] is the built-in
//! implementation backed by a single JSON file, which covers single-machine
//! deployments and tests. Alternative stores (LDAP, SQL) plug in by
//! implementing the same traits.

use crate::{EmuError, EmuResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// What a user may do within one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionLevel {
    ReadOnly,
    ReadWrite,
}

impl PermissionLevel {
    pub fn allows_write(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub email: String,
}

/// Verifies username/password credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `Ok(None)` means "not my user"; a chained caller may try the next
    /// store. Wrong passwords for a known user also yield `Ok(None)`.
    async fn authenticate(&self, username: &str, password: &str) -> EmuResult<Option<User>>;
}

/// Resolves a pre-shared token (from a connection URL) to a user.
#[async_trait]
pub trait Identifier: Send + Sync {
    async fn identify(&self, token: &str) -> EmuResult<Option<User>>;
}

/// Answers per-project permission questions.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn permission(
        &self,
        username: &str,
        project: &str,
    ) -> EmuResult<Option<PermissionLevel>>;

    /// The projects a user holds any permission on.
    async fn list_projects(&self, username: &str) -> EmuResult<Vec<String>>;
}

/// Tries each wrapped authenticator in order, first hit wins.
pub struct ChainedAuthenticator {
    stores: Vec<Arc<dyn Authenticator>>,
}

impl ChainedAuthenticator {
    pub fn new(stores: Vec<Arc<dyn Authenticator>>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl Authenticator for ChainedAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> EmuResult<Option<User>> {
        for store in &self.stores {
            if let Some(user) = store.authenticate(username, password).await? {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    username: String,
    #[serde(default)]
    email: String,
    password: String,
    #[serde(default)]
    tokens: Vec<String>,
    #[serde(default)]
    projects: HashMap<String, PermissionLevel>,
}

#[derive(Debug, Deserialize)]
struct DirectoryFile {
    users: Vec<DirectoryEntry>,
}

/// User store backed by a JSON file, loaded once at startup.
///
/// File shape:
///
/// ```json
/// {
///   "users": [{
///     "username": "alice",
///     "email": "alice@example.com",
///     "password": "...",
///     "tokens": ["0123abcd"],
///     "projects": {"demo": "readWrite"}
///   }]
/// }
/// ```
pub struct StaticDirectory {
    entries: Vec<DirectoryEntry>,
}

impl StaticDirectory {
    pub async fn load(path: &Path) -> EmuResult<Self> {
        let raw = tokio::fs::read(path).await?;
        let file: DirectoryFile = serde_json::from_slice(&raw)?;
        debug!(users = file.users.len(), "loaded user directory");
        Ok(Self {
            entries: file.users,
        })
    }

    /// An empty directory: authenticates nobody, authorizes nothing.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn entry(&self, username: &str) -> Option<&DirectoryEntry> {
        self.entries.iter().find(|e| e.username == username)
    }

    fn user_of(entry: &DirectoryEntry) -> User {
        User {
            username: entry.username.clone(),
            email: entry.email.clone(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticDirectory {
    async fn authenticate(&self, username: &str, password: &str) -> EmuResult<Option<User>> {
        Ok(self
            .entry(username)
            .filter(|e| e.password == password)
            .map(Self::user_of))
    }
}

#[async_trait]
impl Identifier for StaticDirectory {
    async fn identify(&self, token: &str) -> EmuResult<Option<User>> {
        Ok(self
            .entries
            .iter()
            .find(|e| e.tokens.iter().any(|t| t == token))
            .map(Self::user_of))
    }
}

#[async_trait]
impl Authorizer for StaticDirectory {
    async fn permission(
        &self,
        username: &str,
        project: &str,
    ) -> EmuResult<Option<PermissionLevel>> {
        Ok(self
            .entry(username)
            .and_then(|e| e.projects.get(project).copied()))
    }

    async fn list_projects(&self, username: &str) -> EmuResult<Vec<String>> {
        let entry = self.entry(username).ok_or(EmuError::Authentication)?;
        let mut projects: Vec<String> = entry.projects.keys().cloned().collect();
        projects.sort_unstable();
        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    async fn directory() -> StaticDirectory {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"users": [
                {{"username": "alice", "email": "alice@example.com",
                  "password": "s3cret", "tokens": ["deadbeef"],
                  "projects": {{"demo": "readWrite", "archive": "readOnly"}}}},
                {{"username": "bob", "password": "hunter2"}}
            ]}}"#
        )
        .unwrap();
        StaticDirectory::load(file.path()).await.unwrap()
    }

    #[tokio::test]
    async fn password_must_match_exactly() {
        let dir = directory().await;
        let user = dir.authenticate("alice", "s3cret").await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert!(dir.authenticate("alice", "S3CRET").await.unwrap().is_none());
        assert!(dir.authenticate("ghost", "s3cret").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tokens_identify_users() {
        let dir = directory().await;
        let user = dir.identify("deadbeef").await.unwrap().unwrap();
        assert_eq!(user.username, "alice");
        assert!(dir.identify("feedface").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn permissions_are_per_project() {
        let dir = directory().await;
        assert_eq!(
            dir.permission("alice", "demo").await.unwrap(),
            Some(PermissionLevel::ReadWrite)
        );
        assert_eq!(
            dir.permission("alice", "archive").await.unwrap(),
            Some(PermissionLevel::ReadOnly)
        );
        assert_eq!(dir.permission("alice", "other").await.unwrap(), None);
        assert_eq!(dir.permission("bob", "demo").await.unwrap(), None);

        assert_eq!(dir.list_projects("alice").await.unwrap(), ["archive", "demo"]);
    }

    #[tokio::test]
    async fn chained_authenticator_falls_through() {
        let first = Arc::new(StaticDirectory::empty());
        let second = Arc::new(directory().await);
        let chain = ChainedAuthenticator::new(vec![first, second]);

        assert!(chain
            .authenticate("alice", "s3cret")
            .await
            .unwrap()
            .is_some());
        assert!(chain.authenticate("alice", "nope").await.unwrap().is_none());
    }
}
