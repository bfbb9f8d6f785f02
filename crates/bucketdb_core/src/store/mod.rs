//! The ordered transactional key-value store.
//!
//! A [`Store`] holds named buckets of byte keys and byte values. Work is done
//! in closures:
//!
//! - [`Store::view`] runs a read-only transaction against the latest
//!   committed snapshot. Any number of views run concurrently.
//! - [`Store::update`] runs a read-write transaction. Writers are serialized;
//!   the transaction commits if the closure returns `Ok` and rolls back if
//!   it returns `Err`.
//!
//! Committed transactions are appended to a commit log and replayed on open.
//!
//! ```rust,ignore
//! use bucketdb_core::Store;
//!
//! let store = Store::open_in_memory()?;
//! store.update(|txn| {
//!     let mut bucket = txn.create_bucket_if_not_exists(b"users")?;
//!     bucket.put(b"alice", b"{}")
//! })?;
//! let found = store.view(|txn| {
//!     Ok::<_, bucketdb_core::CoreError>(txn.bucket(b"users").and_then(|b| b.get(b"alice")).is_some())
//! })?;
//! ```

pub(crate) mod log;
pub(crate) mod snapshot;
mod txn;

pub use txn::{BucketMut, BucketView, Buckets, Cursor, ReadTxn, WriteTxn};

use crate::config::Config;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::stats::StoreStats;
use bucketdb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use log::{CommitFrame, CommitLog};
use parking_lot::{Mutex, MutexGuard, RwLock};
use snapshot::Snapshot;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Handle on an open store.
///
/// Cloning is cheap; all clones share the same underlying store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: Config,
    /// Directory path, `None` for stores without one.
    path: Option<PathBuf>,
    /// Directory lock, released on close.
    dir: Mutex<Option<StoreDir>>,
    /// Latest committed state.
    current: RwLock<Arc<Snapshot>>,
    /// Serializes writers. `None` once the store is closed.
    writer: Mutex<Option<Writer>>,
    stats: Arc<StoreStats>,
    is_open: RwLock<bool>,
}

struct Writer {
    log: CommitLog,
    next_sequence: u64,
}

impl Store {
    /// Opens the store in directory `path` with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseLocked` if another process holds the directory,
    /// and `LogCorruption` or `ChecksumMismatch` if the commit log cannot be
    /// replayed.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens the store in directory `path` with a custom configuration.
    ///
    /// ```rust,ignore
    /// use bucketdb_core::{Config, Store};
    /// use std::time::Duration;
    ///
    /// let config = Config::default()
    ///     .sync_on_commit(false)
    ///     .write_timeout(Some(Duration::from_secs(5)));
    /// let store = Store::open_with_config(Path::new("data"), config)?;
    /// ```
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing, config.lock_timeout)?;
        let backend = FileBackend::open(&dir.log_path())?;
        let path = dir.path().to_path_buf();

        info!(path = %path.display(), "opening store");
        Self::build(config, Box::new(backend), Some(path), Some(dir))
    }

    /// Opens a store that lives only in memory.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Config::default(), Box::new(InMemoryBackend::new()))
    }

    /// Opens a store over an arbitrary commit log backend.
    ///
    /// The backend's existing contents are replayed.
    pub fn open_with_backend(config: Config, backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        Self::build(config, backend, None, None)
    }

    fn build(
        config: Config,
        backend: Box<dyn StorageBackend>,
        path: Option<PathBuf>,
        dir: Option<StoreDir>,
    ) -> CoreResult<Self> {
        let (log, recovered) = CommitLog::open(backend, config.sync_on_commit)?;

        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                path,
                dir: Mutex::new(dir),
                current: RwLock::new(Arc::new(recovered.snapshot)),
                writer: Mutex::new(Some(Writer {
                    log,
                    next_sequence: recovered.next_sequence,
                })),
                stats: Arc::new(StoreStats::new()),
                is_open: RwLock::new(true),
            }),
        })
    }

    /// Runs `f` in a read-only transaction.
    ///
    /// Errors returned by `f` are passed through unchanged.
    pub fn view<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&ReadTxn) -> Result<R, E>,
        E: From<CoreError>,
    {
        self.ensure_open()?;
        self.inner.stats.record_transaction_start();

        let snapshot = Arc::clone(&self.inner.current.read());
        let txn = ReadTxn::new(snapshot, Arc::clone(&self.inner.stats));
        f(&txn)
    }

    /// Runs `f` in a read-write transaction.
    ///
    /// If `f` returns `Ok` the transaction commits: its changes are logged
    /// and become visible to later transactions. If `f` returns `Err` every
    /// change it made is discarded and the error is returned unchanged.
    ///
    /// Only one write transaction runs at a time. Calling `update` from
    /// inside `f` waits on itself; with a [`Config::write_timeout`] that
    /// surfaces as `WriteTimeout`, without one it blocks forever.
    pub fn update<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut WriteTxn) -> Result<R, E>,
        E: From<CoreError>,
    {
        self.ensure_open()?;
        let mut guard = self.lock_writer()?;
        let writer = guard.as_mut().ok_or(CoreError::DatabaseClosed)?;
        let stats = &self.inner.stats;
        stats.record_transaction_start();

        let base = Arc::clone(&self.inner.current.read());
        let mut txn = WriteTxn::new((*base).clone(), Arc::clone(stats));

        match f(&mut txn) {
            Ok(value) => {
                self.commit(writer, txn)?;
                Ok(value)
            }
            Err(e) => {
                stats.record_transaction_abort();
                debug!("write transaction rolled back");
                Err(e)
            }
        }
    }

    fn commit(&self, writer: &mut Writer, txn: WriteTxn) -> CoreResult<()> {
        let stats = &self.inner.stats;
        let (snapshot, ops) = txn.into_parts();

        if ops.is_empty() {
            stats.record_transaction_commit();
            return Ok(());
        }

        let frame = CommitFrame {
            sequence: writer.next_sequence,
            ops,
        };
        match writer.log.append(&frame) {
            Ok(bytes) => {
                stats.record_frame(bytes);
                writer.next_sequence += 1;
                *self.inner.current.write() = Arc::new(snapshot);
                stats.record_transaction_commit();
                debug!(
                    sequence = frame.sequence,
                    ops = frame.ops.len(),
                    bytes,
                    "committed write transaction"
                );
                Ok(())
            }
            Err(e) => {
                stats.record_transaction_abort();
                Err(e)
            }
        }
    }

    fn lock_writer(&self) -> CoreResult<MutexGuard<'_, Option<Writer>>> {
        match self.inner.config.write_timeout {
            Some(timeout) => self
                .inner
                .writer
                .try_lock_for(timeout)
                .ok_or(CoreError::WriteTimeout { waited: timeout }),
            None => Ok(self.inner.writer.lock()),
        }
    }

    /// Closes the store.
    ///
    /// Waits for a running write transaction, syncs the commit log and
    /// releases the directory lock. Every later operation on any clone of
    /// this handle returns `DatabaseClosed`. Closing twice is a no-op.
    pub fn close(&self) -> CoreResult<()> {
        let mut writer = self.inner.writer.lock();
        let mut is_open = self.inner.is_open.write();
        if !*is_open {
            return Ok(());
        }

        if let Some(w) = writer.as_mut() {
            w.log.sync()?;
        }
        *writer = None;
        *self.inner.dir.lock() = None;

        *is_open = false;
        info!("store closed");
        Ok(())
    }

    /// Returns true until [`close`](Self::close) is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.inner.is_open.read()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseClosed)
        }
    }

    /// Returns the store's operation counters.
    #[must_use]
    pub fn stats(&self) -> &StoreStats {
        &self.inner.stats
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the store directory, if the store has one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.path)
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn put(store: &Store, bucket: &[u8], key: &[u8], value: &[u8]) {
        store
            .update(|txn| txn.create_bucket_if_not_exists(bucket)?.put(key, value))
            .unwrap();
    }

    fn get(store: &Store, bucket: &[u8], key: &[u8]) -> Option<Vec<u8>> {
        store
            .view(|txn| {
                Ok::<_, CoreError>(
                    txn.bucket(bucket)
                        .and_then(|b| b.get(key))
                        .map(<[u8]>::to_vec),
                )
            })
            .unwrap()
    }

    #[test]
    fn commit_is_visible() {
        let store = Store::open_in_memory().unwrap();
        put(&store, b"b", b"k", b"v");
        assert_eq!(get(&store, b"b", b"k"), Some(b"v".to_vec()));
    }

    #[test]
    fn error_rolls_back() {
        let store = Store::open_in_memory().unwrap();
        put(&store, b"b", b"k", b"v1");

        let result: Result<(), CoreError> = store.update(|txn| {
            let mut bucket = txn.bucket_mut(b"b").unwrap();
            bucket.put(b"k", b"v2")?;
            bucket.put(b"other", b"x")?;
            Err(CoreError::invalid_argument("stop"))
        });
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));

        assert_eq!(get(&store, b"b", b"k"), Some(b"v1".to_vec()));
        assert_eq!(get(&store, b"b", b"other"), None);
        assert_eq!(store.stats().snapshot().transactions_aborted, 1);
    }

    #[derive(Debug, PartialEq)]
    enum AppError {
        Store(String),
        Custom(u32),
    }

    impl From<CoreError> for AppError {
        fn from(e: CoreError) -> Self {
            AppError::Store(e.to_string())
        }
    }

    #[test]
    fn caller_error_passes_through() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<(), AppError> = store.update(|_| Err(AppError::Custom(7)));
        assert_eq!(result, Err(AppError::Custom(7)));

        let result: Result<(), AppError> = store.view(|_| Err(AppError::Custom(8)));
        assert_eq!(result, Err(AppError::Custom(8)));
    }

    #[test]
    fn view_is_isolated_from_later_commits() {
        let store = Store::open_in_memory().unwrap();
        put(&store, b"b", b"k", b"v1");

        store
            .view(|txn| {
                put(&store, b"b", b"k", b"v2");
                assert_eq!(txn.bucket(b"b").unwrap().get(b"k"), Some(b"v1".as_slice()));
                Ok::<_, CoreError>(())
            })
            .unwrap();

        assert_eq!(get(&store, b"b", b"k"), Some(b"v2".to_vec()));
    }

    #[test]
    fn read_only_update_logs_nothing() {
        let store = Store::open_in_memory().unwrap();
        put(&store, b"b", b"k", b"v");
        let before = store.stats().snapshot();

        store
            .update(|txn| {
                assert!(txn.bucket(b"b").unwrap().contains(b"k"));
                Ok::<_, CoreError>(())
            })
            .unwrap();

        let after = store.stats().snapshot();
        assert_eq!(after.frames_logged, before.frames_logged);
        assert_eq!(after.transactions_committed, before.transactions_committed + 1);
    }

    #[test]
    fn reopen_replays_log() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");

        {
            let store = Store::open(&path).unwrap();
            put(&store, b"b", b"k1", b"v1");
            put(&store, b"b", b"k2", b"v2");
            store
                .update(|txn| {
                    let mut bucket = txn.bucket_mut(b"b").unwrap();
                    bucket.delete(b"k1");
                    bucket.next_sequence();
                    Ok::<_, CoreError>(())
                })
                .unwrap();
            store.close().unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
        assert_eq!(get(&store, b"b", b"k1"), None);
        assert_eq!(get(&store, b"b", b"k2"), Some(b"v2".to_vec()));
        let sequence = store
            .view(|txn| Ok::<_, CoreError>(txn.bucket(b"b").unwrap().sequence()))
            .unwrap();
        assert_eq!(sequence, 1);
    }

    #[test]
    fn closed_store_rejects_work() {
        let store = Store::open_in_memory().unwrap();
        let clone = store.clone();
        store.close().unwrap();
        store.close().unwrap();

        assert!(!clone.is_open());
        let result = clone.view(|_| Ok::<_, CoreError>(()));
        assert!(matches!(result, Err(CoreError::DatabaseClosed)));
        let result = clone.update(|_| Ok::<_, CoreError>(()));
        assert!(matches!(result, Err(CoreError::DatabaseClosed)));
    }

    #[test]
    fn close_releases_directory_lock() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("store");
        let config = Config::default().lock_timeout(Duration::ZERO);

        let first = Store::open_with_config(&path, config.clone()).unwrap();
        assert!(matches!(
            Store::open_with_config(&path, config.clone()),
            Err(CoreError::DatabaseLocked)
        ));

        first.close().unwrap();
        assert!(Store::open_with_config(&path, config).is_ok());
    }

    #[test]
    fn nested_update_times_out() {
        let config = Config::default().write_timeout(Some(Duration::from_millis(20)));
        let store =
            Store::open_with_backend(config, Box::new(InMemoryBackend::new())).unwrap();

        let result = store.update(|_| store.update(|_| Ok::<_, CoreError>(())));
        assert!(matches!(result, Err(CoreError::WriteTimeout { .. })));
    }

    #[test]
    fn backend_contents_are_replayed() {
        let backend = InMemoryBackend::new();
        {
            let store =
                Store::open_with_backend(Config::default(), Box::new(backend.clone())).unwrap();
            put(&store, b"b", b"k", b"v");
        }

        let store = Store::open_with_backend(Config::default(), Box::new(backend)).unwrap();
        assert_eq!(get(&store, b"b", b"k"), Some(b"v".to_vec()));
    }
}
