//! Store statistics.
//!
//! Counters are bumped as operations happen and can be read at any time:
//!
//! ```rust,ignore
//! let before = store.stats().snapshot();
//! bucket.update_all(|key, record: Item| Ok(Transformed::write(key, record)))?;
//! let after = store.stats().snapshot();
//! assert_eq!(after.puts, before.puts); // nothing changed, nothing written
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Store statistics.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Point lookups (`get`, `contains`).
    reads: AtomicU64,
    /// Puts issued inside write transactions, committed or not.
    puts: AtomicU64,
    /// Deletes of existing keys issued inside write transactions.
    deletes: AtomicU64,
    /// Cursors opened over a bucket.
    scans: AtomicU64,
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    /// Commit log frames appended.
    frames_logged: AtomicU64,
    /// Commit log bytes appended.
    bytes_logged: AtomicU64,
}

impl StoreStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_scan(&self) {
        self.scans.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame(&self, bytes: u64) {
        self.frames_logged.fetch_add(1, Ordering::Relaxed);
        self.bytes_logged.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Returns the number of point lookups.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of puts.
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Returns the number of deletes.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Returns the number of bucket scans.
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads(),
            puts: self.puts(),
            deletes: self.deletes(),
            scans: self.scans(),
            transactions_started: self.transactions_started.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            frames_logged: self.frames_logged.load(Ordering::Relaxed),
            bytes_logged: self.bytes_logged.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Point lookups.
    pub reads: u64,
    /// Puts issued.
    pub puts: u64,
    /// Deletes issued.
    pub deletes: u64,
    /// Bucket scans.
    pub scans: u64,
    /// Transactions started (read and write).
    pub transactions_started: u64,
    /// Write transactions committed.
    pub transactions_committed: u64,
    /// Write transactions rolled back.
    pub transactions_aborted: u64,
    /// Commit log frames appended.
    pub frames_logged: u64,
    /// Commit log bytes appended.
    pub bytes_logged: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(StoreStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_operations() {
        let stats = StoreStats::new();

        stats.record_read();
        stats.record_put();
        stats.record_put();
        stats.record_delete();
        stats.record_scan();
        stats.record_transaction_start();
        stats.record_transaction_abort();
        stats.record_frame(42);

        let snap = stats.snapshot();
        assert_eq!(snap.reads, 1);
        assert_eq!(snap.puts, 2);
        assert_eq!(snap.deletes, 1);
        assert_eq!(snap.scans, 1);
        assert_eq!(snap.transactions_started, 1);
        assert_eq!(snap.transactions_aborted, 1);
        assert_eq!(snap.transactions_committed, 0);
        assert_eq!(snap.frames_logged, 1);
        assert_eq!(snap.bytes_logged, 42);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(StoreStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_put();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.puts(), 800);
    }
}
