//! Server runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the
//! servers by handle. Nothing in this crate reads environment variables during
//! request handling; that keeps behaviour consistent across worker threads and
//! lets tests construct configurations directly.

use crate::{EmuError, EmuResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of retry attempts when a lock is contended.
pub const DEFAULT_LOCK_RETRIES: u32 = 2;

/// Default pause between lock retry attempts.
pub const DEFAULT_LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration shared by the protocol server and the manager API.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    data_dir: PathBuf,
    filter_finished_bundles: bool,
    lock_retries: u32,
    lock_retry_interval: Duration,
}

impl ServerConfig {
    /// Create a configuration rooted at `data_dir`.
    ///
    /// The directory must exist; it is canonicalized so that later path
    /// containment checks (rejecting connection URLs that escape the root)
    /// compare against a stable absolute path.
    pub fn new(data_dir: impl Into<PathBuf>) -> EmuResult<Self> {
        let data_dir = data_dir.into();
        if !data_dir.is_dir() {
            return Err(EmuError::Internal(format!(
                "data directory does not exist: {}",
                data_dir.display()
            )));
        }
        let data_dir = data_dir.canonicalize()?;

        Ok(Self {
            data_dir,
            filter_finished_bundles: true,
            lock_retries: DEFAULT_LOCK_RETRIES,
            lock_retry_interval: DEFAULT_LOCK_RETRY_INTERVAL,
        })
    }

    /// Whether bundle-list entries with `finishedEditing == true` are hidden
    /// from protocol clients. They always remain on disk.
    pub fn with_filter_finished_bundles(mut self, filter: bool) -> Self {
        self.filter_finished_bundles = filter;
        self
    }

    pub fn with_lock_retry(mut self, retries: u32, interval: Duration) -> Self {
        self.lock_retries = retries;
        self.lock_retry_interval = interval;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn filter_finished_bundles(&self) -> bool {
        self.filter_finished_bundles
    }

    pub fn lock_retries(&self) -> u32 {
        self.lock_retries
    }

    pub fn lock_retry_interval(&self) -> Duration {
        self.lock_retry_interval
    }
}
