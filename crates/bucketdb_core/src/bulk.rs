//! Bulk scan-and-rewrite over a whole bucket.
//!
//! A pass visits every record of a bucket once, in ascending key order, and
//! asks a transform what to do with it:
//!
//! - [`Transformed::Delete`]: the record is removed.
//! - [`Transformed::Write`] with a different key: the record moves. The old
//!   key is removed and the new one written.
//! - [`Transformed::Write`] with the same key: the record is rewritten in
//!   place, unless it encodes to exactly the bytes already stored, in which
//!   case nothing is written.
//!
//! Decisions are staged while the cursor runs and applied only after it has
//! finished, deletes before puts. The scan therefore only ever sees the
//! bucket as it was when the pass started, and a renamed record can land on
//! a key another record is vacating in the same pass.
//!
//! The whole pass runs in one write transaction. If decoding, the transform
//! or encoding fails for any record the transaction rolls back and the
//! bucket is left exactly as it was.
//!
//! ```rust,ignore
//! use bucketdb_core::Transformed;
//!
//! // Drop inactive users, bump everyone else's version.
//! bucket.update_all(|key, mut user: User| {
//!     if !user.active {
//!         return Ok(Transformed::Delete);
//!     }
//!     user.version += 1;
//!     Ok(Transformed::write(key, user))
//! })?;
//! ```

use crate::error::{display_bytes, CoreError, CoreResult};
use crate::store::{BucketMut, WriteTxn};
use bucketdb_codec::RecordCodec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// What a transform decided for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transformed<T> {
    /// Store `record` under `key`, which may differ from the original key.
    Write {
        /// Key to store the record under.
        key: Vec<u8>,
        /// The record to store.
        record: T,
    },
    /// Remove the record.
    Delete,
}

impl<T> Transformed<T> {
    /// Keeps (or moves) the record under `key`.
    pub fn write(key: impl Into<Vec<u8>>, record: T) -> Self {
        Self::Write {
            key: key.into(),
            record,
        }
    }

    /// Converts the record, leaving the decision itself alone.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Transformed<U> {
        match self {
            Self::Write { key, record } => Transformed::Write {
                key,
                record: f(record),
            },
            Self::Delete => Transformed::Delete,
        }
    }

    /// Fallible version of [`map`](Self::map).
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Transformed<U>, E> {
        Ok(match self {
            Self::Write { key, record } => Transformed::Write {
                key,
                record: f(record)?,
            },
            Self::Delete => Transformed::Delete,
        })
    }
}

/// Counts of what one pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteReport {
    /// Records the cursor visited.
    pub visited: usize,
    /// Records removed.
    pub deleted: usize,
    /// Records moved to a new key.
    pub renamed: usize,
    /// Records rewritten in place with different bytes.
    pub rewritten: usize,
    /// Records left untouched.
    pub unchanged: usize,
}

impl RewriteReport {
    /// Number of puts the pass issued.
    #[must_use]
    pub fn puts(&self) -> usize {
        self.renamed + self.rewritten
    }

    /// Returns true if the pass wrote nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.deleted == 0 && self.puts() == 0
    }
}

/// Deletes and puts collected during a pass.
///
/// Nothing reaches the bucket until [`apply`](Self::apply) runs. Dropping
/// the set discards everything staged.
#[derive(Debug, Default)]
pub struct StagedMutations {
    deletes: Vec<Vec<u8>>,
    puts: Vec<(Vec<u8>, Vec<u8>)>,
}

impl StagedMutations {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages removal of `key`.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.deletes.push(key.into());
    }

    /// Stages a write of `value` under `key`.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.puts.push((key.into(), value.into()));
    }

    /// Keys staged for removal, in staging order.
    pub fn deletes(&self) -> &[Vec<u8>] {
        &self.deletes
    }

    /// Entries staged for writing, in staging order.
    pub fn puts(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.puts
    }

    /// Returns true if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.puts.is_empty()
    }

    /// Stages the outcome of one transform call against the record it was
    /// given, updating `report`.
    fn stage(
        &mut self,
        report: &mut RewriteReport,
        key: &[u8],
        original: &[u8],
        outcome: Transformed<Vec<u8>>,
    ) -> CoreResult<()> {
        match outcome {
            Transformed::Delete => {
                self.delete(key);
                report.deleted += 1;
            }
            Transformed::Write {
                key: new_key,
                record: value,
            } => {
                if new_key.is_empty() {
                    return Err(CoreError::invalid_argument(format!(
                        "transform returned an empty key for {}",
                        display_bytes(key)
                    )));
                }
                if new_key != key {
                    self.delete(key);
                    self.put(new_key, value);
                    report.renamed += 1;
                } else if value != original {
                    self.put(new_key, value);
                    report.rewritten += 1;
                } else {
                    report.unchanged += 1;
                }
            }
        }
        Ok(())
    }

    /// Writes everything staged into `bucket`: all deletes, then all puts.
    pub fn apply(self, bucket: &mut BucketMut<'_>) -> CoreResult<()> {
        for key in &self.deletes {
            bucket.delete(key);
        }
        for (key, value) in &self.puts {
            bucket.put(key, value)?;
        }
        Ok(())
    }
}

/// Runs one pass over raw bytes.
///
/// `transform` receives each key and its stored bytes and returns the
/// bytes to store. Errors from `transform` are returned unchanged.
pub fn rewrite_raw<E, F>(bucket: &mut BucketMut<'_>, mut transform: F) -> Result<RewriteReport, E>
where
    F: FnMut(&[u8], &[u8]) -> Result<Transformed<Vec<u8>>, E>,
    E: From<CoreError>,
{
    let mut staged = StagedMutations::new();
    let mut report = RewriteReport::default();

    for (key, value) in bucket.iter() {
        report.visited += 1;
        let outcome = transform(key, value)?;
        staged.stage(&mut report, key, value, outcome)?;
    }

    staged.apply(bucket)?;
    Ok(report)
}

/// Decodes one stored record as `T`, runs `transform` and encodes the
/// result.
pub(crate) fn convert_record<T, U, E, C, F>(
    codec: &C,
    key: &[u8],
    value: &[u8],
    transform: F,
) -> Result<Transformed<Vec<u8>>, E>
where
    T: DeserializeOwned,
    U: Serialize,
    E: From<CoreError>,
    C: RecordCodec,
    F: FnOnce(&[u8], T) -> Result<Transformed<U>, E>,
{
    let record: T = codec.decode(value).map_err(CoreError::from)?;
    let outcome = transform(key, record)?;
    let encoded = outcome.try_map(|record| codec.encode(&record).map_err(CoreError::from))?;
    Ok(encoded)
}

/// Runs one typed pass over `bucket`.
///
/// Every stored value is decoded as `T`, handed to `transform` and the
/// resulting `U` encoded with `codec`.
pub fn rewrite<T, U, E, C, F>(
    bucket: &mut BucketMut<'_>,
    codec: &C,
    mut transform: F,
) -> Result<RewriteReport, E>
where
    T: DeserializeOwned,
    U: Serialize,
    E: From<CoreError>,
    C: RecordCodec,
    F: FnMut(&[u8], T) -> Result<Transformed<U>, E>,
{
    rewrite_raw(bucket, |key, value| {
        convert_record::<T, U, E, C, _>(codec, key, value, &mut transform)
    })
}

/// Runs one typed pass over the bucket named `bucket` inside `txn`.
///
/// # Errors
///
/// Returns `BucketNotFound` if the bucket does not exist; anything else
/// comes from the pass itself.
pub fn rewrite_in<T, U, E, C, F>(
    txn: &mut WriteTxn,
    bucket: &[u8],
    codec: &C,
    transform: F,
) -> Result<RewriteReport, E>
where
    T: DeserializeOwned,
    U: Serialize,
    E: From<CoreError>,
    C: RecordCodec,
    F: FnMut(&[u8], T) -> Result<Transformed<U>, E>,
{
    let mut handle = txn
        .bucket_mut(bucket)
        .ok_or_else(|| CoreError::bucket_not_found(bucket))?;

    debug!(
        bucket = %display_bytes(bucket),
        records = handle.len(),
        codec = codec.name(),
        "starting bulk rewrite"
    );
    let report = rewrite(&mut handle, codec, transform)?;
    debug!(
        bucket = %display_bytes(bucket),
        visited = report.visited,
        deleted = report.deleted,
        renamed = report.renamed,
        rewritten = report.rewritten,
        unchanged = report.unchanged,
        "bulk rewrite finished"
    );
    Ok(report)
}
