//! Read and write transactions over a [`Snapshot`].
//!
//! A [`ReadTxn`] pins the snapshot that was current when it began. A
//! [`WriteTxn`] works on a private copy of that snapshot and records every
//! mutation as a [`LogOp`]; the store turns those into one commit log frame
//! when the closure that owns the transaction returns `Ok`.

use crate::error::{CoreError, CoreResult};
use crate::stats::StoreStats;
use crate::store::log::LogOp;
use crate::store::snapshot::{BucketData, Snapshot};
use std::collections::btree_map;
use std::ops::Bound;
use std::sync::Arc;

/// Access to named buckets shared by both transaction kinds.
///
/// Code that only reads, like migration bookkeeping, can be written once
/// against this trait and run inside either a [`ReadTxn`] or a [`WriteTxn`].
pub trait Buckets {
    /// Returns a read-only view of the named bucket, if it exists.
    fn bucket(&self, name: &[u8]) -> Option<BucketView<'_>>;

    /// Returns the names of all buckets in ascending order.
    fn bucket_names(&self) -> Vec<Vec<u8>>;
}

/// A read-only transaction.
///
/// Sees the state as of the last commit before it began; later commits are
/// invisible to it.
pub struct ReadTxn {
    snapshot: Arc<Snapshot>,
    stats: Arc<StoreStats>,
}

impl ReadTxn {
    pub(crate) fn new(snapshot: Arc<Snapshot>, stats: Arc<StoreStats>) -> Self {
        Self { snapshot, stats }
    }

    /// Returns a view of the named bucket, if it exists.
    pub fn bucket(&self, name: &[u8]) -> Option<BucketView<'_>> {
        view_of(&self.snapshot, name, &self.stats)
    }

    /// Returns the names of all buckets.
    pub fn bucket_names(&self) -> Vec<Vec<u8>> {
        self.snapshot.buckets.keys().cloned().collect()
    }
}

impl Buckets for ReadTxn {
    fn bucket(&self, name: &[u8]) -> Option<BucketView<'_>> {
        ReadTxn::bucket(self, name)
    }

    fn bucket_names(&self) -> Vec<Vec<u8>> {
        ReadTxn::bucket_names(self)
    }
}

/// A read-write transaction.
///
/// Changes are visible to the transaction itself immediately and to
/// everybody else only after commit.
pub struct WriteTxn {
    snapshot: Snapshot,
    ops: Vec<LogOp>,
    stats: Arc<StoreStats>,
}

impl WriteTxn {
    pub(crate) fn new(snapshot: Snapshot, stats: Arc<StoreStats>) -> Self {
        Self {
            snapshot,
            ops: Vec::new(),
            stats,
        }
    }

    /// Returns a read-only view of the named bucket, if it exists.
    pub fn bucket(&self, name: &[u8]) -> Option<BucketView<'_>> {
        view_of(&self.snapshot, name, &self.stats)
    }

    /// Returns a mutable handle on the named bucket, if it exists.
    pub fn bucket_mut(&mut self, name: &[u8]) -> Option<BucketMut<'_>> {
        let data = self.snapshot.buckets.get_mut(name)?;
        Some(BucketMut {
            name: name.to_vec(),
            data,
            ops: &mut self.ops,
            stats: &self.stats,
        })
    }

    /// Creates a bucket.
    ///
    /// # Errors
    ///
    /// Returns `BucketAlreadyExists` if the name is taken and
    /// `InvalidArgument` if it is empty.
    pub fn create_bucket(&mut self, name: &[u8]) -> CoreResult<BucketMut<'_>> {
        if name.is_empty() {
            return Err(CoreError::invalid_argument("bucket name must not be empty"));
        }
        if self.snapshot.buckets.contains_key(name) {
            return Err(CoreError::bucket_already_exists(name));
        }
        self.snapshot
            .buckets
            .insert(name.to_vec(), Arc::new(BucketData::default()));
        self.ops.push(LogOp::CreateBucket {
            name: name.to_vec(),
        });
        self.bucket_mut(name)
            .ok_or_else(|| CoreError::bucket_not_found(name))
    }

    /// Returns the named bucket, creating it first if needed.
    pub fn create_bucket_if_not_exists(&mut self, name: &[u8]) -> CoreResult<BucketMut<'_>> {
        if self.snapshot.buckets.contains_key(name) {
            return self
                .bucket_mut(name)
                .ok_or_else(|| CoreError::bucket_not_found(name));
        }
        self.create_bucket(name)
    }

    /// Deletes a bucket and everything in it.
    ///
    /// # Errors
    ///
    /// Returns `BucketNotFound` if there is no such bucket.
    pub fn delete_bucket(&mut self, name: &[u8]) -> CoreResult<()> {
        if self.snapshot.buckets.remove(name).is_none() {
            return Err(CoreError::bucket_not_found(name));
        }
        self.ops.push(LogOp::DeleteBucket {
            name: name.to_vec(),
        });
        Ok(())
    }

    /// Returns the names of all buckets.
    pub fn bucket_names(&self) -> Vec<Vec<u8>> {
        self.snapshot.buckets.keys().cloned().collect()
    }

    /// Returns true if the transaction has recorded any mutation.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.ops.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Snapshot, Vec<LogOp>) {
        (self.snapshot, self.ops)
    }
}

impl Buckets for WriteTxn {
    fn bucket(&self, name: &[u8]) -> Option<BucketView<'_>> {
        WriteTxn::bucket(self, name)
    }

    fn bucket_names(&self) -> Vec<Vec<u8>> {
        WriteTxn::bucket_names(self)
    }
}

fn view_of<'a>(
    snapshot: &'a Snapshot,
    name: &[u8],
    stats: &'a StoreStats,
) -> Option<BucketView<'a>> {
    let (name, data) = snapshot.buckets.get_key_value(name)?;
    Some(BucketView { name, data, stats })
}

/// Read-only view of one bucket.
#[derive(Clone, Copy)]
pub struct BucketView<'a> {
    name: &'a [u8],
    data: &'a BucketData,
    stats: &'a StoreStats,
}

impl<'a> BucketView<'a> {
    /// Returns the bucket name.
    pub fn name(&self) -> &'a [u8] {
        self.name
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<&'a [u8]> {
        self.stats.record_read();
        self.data.entries.get(key).map(Vec::as_slice)
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.stats.record_read();
        self.data.entries.contains_key(key)
    }

    /// Returns the number of keys.
    pub fn len(&self) -> usize {
        self.data.entries.len()
    }

    /// Returns true if the bucket holds no keys.
    pub fn is_empty(&self) -> bool {
        self.data.entries.is_empty()
    }

    /// Returns the last value handed out by `next_sequence`.
    pub fn sequence(&self) -> u64 {
        self.data.sequence
    }

    /// Iterates over all entries in ascending key order.
    pub fn iter(&self) -> Cursor<'a> {
        Cursor::new(self.data, Bound::Unbounded, self.stats)
    }

    /// Iterates over entries whose key is `>= start`.
    pub fn iter_from(&self, start: &[u8]) -> Cursor<'a> {
        Cursor::new(self.data, Bound::Included(start), self.stats)
    }
}

/// Mutable handle on one bucket inside a [`WriteTxn`].
///
/// While a [`Cursor`] borrowed from this handle is alive the handle cannot
/// be written to. Passes that mutate what they scan collect their changes
/// first and apply them after the cursor is gone.
pub struct BucketMut<'a> {
    name: Vec<u8>,
    data: &'a mut Arc<BucketData>,
    ops: &'a mut Vec<LogOp>,
    stats: &'a StoreStats,
}

impl<'a> BucketMut<'a> {
    /// Returns the bucket name.
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.stats.record_read();
        self.data.entries.get(key).map(Vec::as_slice)
    }

    /// Returns true if `key` is present.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.stats.record_read();
        self.data.entries.contains_key(key)
    }

    /// Returns the number of keys.
    pub fn len(&self) -> usize {
        self.data.entries.len()
    }

    /// Returns true if the bucket holds no keys.
    pub fn is_empty(&self) -> bool {
        self.data.entries.is_empty()
    }

    /// Returns the last value handed out by [`next_sequence`](Self::next_sequence).
    pub fn sequence(&self) -> u64 {
        self.data.sequence
    }

    /// Iterates over all entries in ascending key order.
    pub fn iter(&self) -> Cursor<'_> {
        Cursor::new(&**self.data, Bound::Unbounded, self.stats)
    }

    /// Iterates over entries whose key is `>= start`.
    pub fn iter_from(&self, start: &[u8]) -> Cursor<'_> {
        Cursor::new(&**self.data, Bound::Included(start), self.stats)
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `key` is empty.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        if key.is_empty() {
            return Err(CoreError::invalid_argument("key must not be empty"));
        }
        self.stats.record_put();
        Arc::make_mut(self.data)
            .entries
            .insert(key.to_vec(), value.to_vec());
        self.ops.push(LogOp::Put {
            bucket: self.name.clone(),
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Removes `key`. Returns true if it was present.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        if !self.data.entries.contains_key(key) {
            return false;
        }
        self.stats.record_delete();
        Arc::make_mut(self.data).entries.remove(key);
        self.ops.push(LogOp::Delete {
            bucket: self.name.clone(),
            key: key.to_vec(),
        });
        true
    }

    /// Advances and returns the bucket's sequence counter.
    ///
    /// The first call on a fresh bucket returns 1. Like any other write the
    /// increment is discarded if the transaction rolls back.
    pub fn next_sequence(&mut self) -> u64 {
        let data = Arc::make_mut(self.data);
        data.sequence += 1;
        let sequence = data.sequence;
        self.ops.push(LogOp::SetSequence {
            bucket: self.name.clone(),
            sequence,
        });
        sequence
    }
}

/// Ordered iterator over a bucket's entries.
pub struct Cursor<'a> {
    range: btree_map::Range<'a, Vec<u8>, Vec<u8>>,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a BucketData, start: Bound<&[u8]>, stats: &StoreStats) -> Self {
        stats.record_scan();
        Self {
            range: data
                .entries
                .range::<[u8], _>((start, Bound::Unbounded)),
        }
    }
}

impl<'a> Iterator for Cursor<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        self.range
            .next()
            .map(|(key, value)| (key.as_slice(), value.as_slice()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.range.size_hint()
    }
}

impl DoubleEndedIterator for Cursor<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.range
            .next_back()
            .map(|(key, value)| (key.as_slice(), value.as_slice()))
    }
}
