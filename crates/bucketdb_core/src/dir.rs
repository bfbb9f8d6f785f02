//! Store directory management.
//!
//! On-disk layout:
//!
//! ```text
//! <store_path>/
//! ├─ LOCK           # Advisory lock, held while the store is open
//! └─ commit.log     # Append-only commit log
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "commit.log";

/// Interval between attempts to take the directory lock.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// An opened store directory holding the exclusive lock.
///
/// The lock is released when this value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes its lock.
    ///
    /// The lock is retried until `lock_timeout` has elapsed.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidStore`] if the directory is missing and
    ///   `create_if_missing` is false, or the path is not a directory
    /// - [`CoreError::DatabaseLocked`] if another handle keeps the lock
    ///   for longer than `lock_timeout`
    pub fn open(path: &Path, create_if_missing: bool, lock_timeout: Duration) -> CoreResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(CoreError::invalid_store(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_store(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        let started = Instant::now();
        while lock_file.try_lock_exclusive().is_err() {
            if started.elapsed() >= lock_timeout {
                return Err(CoreError::DatabaseLocked);
            }
            thread::sleep(LOCK_RETRY_INTERVAL);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the commit log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }
}
