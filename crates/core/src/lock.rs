//! In-process advisory locks over projects and databases.
//!
//! Locks serialize mutating operations. They are purely in-memory: a restart
//! clears all locks, which is correct because no operation survives a restart
//! either. Two levels exist:
//!
//! - a database lock, held for mutations of one database, and
//! - a project lock, held for operations that restructure the project
//!   (rename, delete). A project lock excludes every database lock in that
//!   project and vice versa.
//!
//! Acquisition hands out a monotonically increasing [`LockId`]; release
//! requires presenting the same ID, so a stale holder cannot release a lock
//! that was re-acquired after a forced cleanup.

use crate::{EmuError, EmuResult, ServerConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Token proving ownership of one acquired lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockId(u64);

#[derive(Default)]
struct LockTable {
    next_id: u64,
    projects: HashMap<String, u64>,
    databases: HashMap<String, HashMap<String, u64>>,
}

impl LockTable {
    fn try_lock_database(&mut self, project: &str, database: &str) -> Option<LockId> {
        if self.projects.contains_key(project) {
            return None;
        }
        let dbs = self.databases.entry(project.to_string()).or_default();
        if dbs.contains_key(database) {
            return None;
        }
        self.next_id += 1;
        dbs.insert(database.to_string(), self.next_id);
        Some(LockId(self.next_id))
    }

    fn try_lock_project(&mut self, project: &str) -> Option<LockId> {
        if self.projects.contains_key(project) {
            return None;
        }
        if self
            .databases
            .get(project)
            .is_some_and(|dbs| !dbs.is_empty())
        {
            return None;
        }
        self.next_id += 1;
        self.projects.insert(project.to_string(), self.next_id);
        Some(LockId(self.next_id))
    }

    fn unlock_database(&mut self, project: &str, database: &str, id: LockId) -> bool {
        let Some(dbs) = self.databases.get_mut(project) else {
            return false;
        };
        if dbs.get(database) != Some(&id.0) {
            return false;
        }
        dbs.remove(database);
        if dbs.is_empty() {
            self.databases.remove(project);
        }
        true
    }

    fn unlock_project(&mut self, project: &str, id: LockId) -> bool {
        if self.projects.get(project) != Some(&id.0) {
            return false;
        }
        self.projects.remove(project);
        true
    }
}

/// Shared lock registry. Cheap to clone, one per process.
#[derive(Clone, Default)]
pub struct LockManager {
    table: Arc<Mutex<LockTable>>,
    retries: u32,
    retry_interval: Duration,
}

impl LockManager {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            table: Arc::default(),
            retries: config.lock_retries(),
            retry_interval: config.lock_retry_interval(),
        }
    }

    /// Acquire the lock for one database, retrying a bounded number of times
    /// before giving up with [`EmuError::Lock`].
    pub async fn lock_database(&self, project: &str, database: &str) -> EmuResult<LockId> {
        self.acquire(project, database, |table| {
            table.try_lock_database(project, database)
        })
        .await
    }

    /// Acquire the whole-project lock. Fails while any database in the
    /// project is locked.
    pub async fn lock_project(&self, project: &str) -> EmuResult<LockId> {
        self.acquire(project, "*", |table| table.try_lock_project(project))
            .await
    }

    async fn acquire<F>(&self, project: &str, what: &str, mut try_lock: F) -> EmuResult<LockId>
    where
        F: FnMut(&mut LockTable) -> Option<LockId>,
    {
        for attempt in 0..=self.retries {
            if let Some(id) = try_lock(&mut self.table.lock()) {
                return Ok(id);
            }
            if attempt < self.retries {
                debug!(project, what, attempt, "lock contended, retrying");
                tokio::time::sleep(self.retry_interval).await;
            }
        }
        Err(EmuError::Lock)
    }

    /// Release a database lock. The ID must match the one handed out at
    /// acquisition; anything else is a caller bug surfaced as an error.
    pub fn unlock_database(&self, project: &str, database: &str, id: LockId) -> EmuResult<()> {
        if self.table.lock().unlock_database(project, database, id) {
            Ok(())
        } else {
            Err(EmuError::Internal(format!(
                "release of database lock not held: {project}/{database}"
            )))
        }
    }

    pub fn unlock_project(&self, project: &str, id: LockId) -> EmuResult<()> {
        if self.table.lock().unlock_project(project, id) {
            Ok(())
        } else {
            Err(EmuError::Internal(format!(
                "release of project lock not held: {project}"
            )))
        }
    }
}
