//! Versioned, resumable record migrations.
//!
//! A migration is one bulk rewrite pass (see [`crate::bulk`]) that decodes
//! every record of a bucket in its old shape and writes it back in a new
//! one, possibly under a new key. Migrations are supplied as an ordered
//! list; the store remembers, per bucket, how many of them have already
//! been applied and only runs the rest.
//!
//! ## Guarantees
//!
//! - Steps run strictly in list order, one at a time.
//! - The applied count only moves forward, and only to the full length of
//!   the list once every pending step has succeeded.
//! - Passing fewer migrations than are already applied is rejected with
//!   `NotEnoughMigrations` before any data is read.
//! - Re-running the same list is a no-op.
//!
//! How much is undone when a step fails depends on [`MigrationMode`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bucketdb_core::{Bucket, Migration, Transformed};
//!
//! #[derive(Serialize, Deserialize)]
//! struct V1 { id: u64, value: u64 }
//! #[derive(Serialize, Deserialize)]
//! struct V2 { id: String, value: String }
//!
//! let migrations = vec![Migration::new("stringify", |_key, old: V1| {
//!     let id = old.id.to_string();
//!     Ok(Transformed::write(id.clone(), V2 { id, value: old.value.to_string() }))
//! })];
//!
//! bucket.migrate(&migrations)?;
//! ```

use crate::bucket::Bucket;
use crate::bulk::{convert_record, rewrite_raw, RewriteReport, Transformed};
use crate::error::{display_bytes, CoreError, CoreResult};
use crate::store::{BucketMut, Buckets, WriteTxn};
use bucketdb_codec::{decode_u64_key, encode_u64_key, CborCodec, RecordCodec};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

/// Name of the bucket holding applied counts.
///
/// Record-layer handles refuse to open it.
pub const MIGRATIONS_BUCKET: &[u8] = b"__bucketdb_migrations";

type Step<C, E> = dyn Fn(&C, &[u8], &[u8]) -> Result<Transformed<Vec<u8>>, E> + Send + Sync;

/// One migration step.
///
/// The old and new record types are fixed when the step is built and
/// erased afterwards, so steps with different shapes fit in one list.
pub struct Migration<C = CborCodec, E = CoreError> {
    name: String,
    step: Box<Step<C, E>>,
}

impl<C, E> Migration<C, E>
where
    C: RecordCodec,
    E: From<CoreError> + 'static,
{
    /// Builds a step that decodes records as `T` and writes back `U`.
    pub fn new<T, U, F>(name: impl Into<String>, transform: F) -> Self
    where
        T: DeserializeOwned + 'static,
        U: Serialize + 'static,
        F: Fn(&[u8], T) -> Result<Transformed<U>, E> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            step: Box::new(move |codec: &C, key: &[u8], value: &[u8]| {
                convert_record::<T, U, E, C, _>(codec, key, value, &transform)
            }),
        }
    }

    /// Returns the step name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the step as one pass over `bucket`.
    pub fn run(&self, bucket: &mut BucketMut<'_>, codec: &C) -> Result<RewriteReport, E> {
        rewrite_raw(bucket, |key, value| (self.step)(codec, key, value))
    }

    fn run_in(&self, txn: &mut WriteTxn, bucket: &[u8], codec: &C) -> Result<RewriteReport, E> {
        let mut handle = txn
            .bucket_mut(bucket)
            .ok_or_else(|| CoreError::bucket_not_found(bucket))?;
        self.run(&mut handle, codec)
    }
}

impl<C, E> fmt::Debug for Migration<C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Where applied counts live.
pub trait MigrationStateStore {
    /// Returns how many migrations have been applied to `bucket`; zero if
    /// nothing was ever recorded.
    fn applied_count(&self, txn: &dyn Buckets, bucket: &[u8]) -> CoreResult<u64>;

    /// Records that `count` migrations have been applied to `bucket`.
    fn set_applied_count(&self, txn: &mut WriteTxn, bucket: &[u8], count: u64) -> CoreResult<()>;
}

/// Keeps applied counts in [`MIGRATIONS_BUCKET`], one entry per bucket
/// name holding the count as 8 big-endian bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReservedBucketState;

impl MigrationStateStore for ReservedBucketState {
    fn applied_count(&self, txn: &dyn Buckets, bucket: &[u8]) -> CoreResult<u64> {
        let Some(state) = txn.bucket(MIGRATIONS_BUCKET) else {
            return Ok(0);
        };
        match state.get(bucket) {
            Some(raw) => Ok(decode_u64_key(raw)?),
            None => Ok(0),
        }
    }

    fn set_applied_count(&self, txn: &mut WriteTxn, bucket: &[u8], count: u64) -> CoreResult<()> {
        txn.create_bucket_if_not_exists(MIGRATIONS_BUCKET)?
            .put(bucket, &encode_u64_key(count))
    }
}

/// How a multi-step migration commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MigrationMode {
    /// Every step commits in its own transaction and the applied count is
    /// written in a final one. If step `i` fails, steps before it stay
    /// committed while the applied count keeps its old value.
    #[default]
    PerStep,
    /// All pending steps and the applied count commit together. A failure
    /// anywhere leaves both data and count untouched.
    Atomic,
}

/// Outcome of [`Migrator::migrate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Applied count before the call.
    pub from: u64,
    /// Applied count after the call.
    pub to: u64,
    /// One report per step that ran.
    pub steps: Vec<RewriteReport>,
}

impl MigrationReport {
    /// Returns true if there was nothing to apply.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

/// Applies migration lists to buckets.
#[derive(Debug, Clone, Default)]
pub struct Migrator<S = ReservedBucketState> {
    state: S,
    mode: MigrationMode,
}

impl Migrator {
    /// Creates a migrator over the reserved state bucket.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: MigrationStateStore> Migrator<S> {
    /// Creates a migrator that records applied counts in `state`.
    pub fn with_state(state: S) -> Self {
        Self {
            state,
            mode: MigrationMode::default(),
        }
    }

    /// Sets the commit mode.
    #[must_use]
    pub fn mode(mut self, mode: MigrationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns how many migrations have been applied to `bucket`.
    pub fn applied_count<C: RecordCodec>(&self, bucket: &Bucket<C>) -> CoreResult<u64> {
        bucket
            .store()
            .view(|txn| self.state.applied_count(txn, bucket.name()))
    }

    /// Brings `bucket` up to date with `migrations`.
    ///
    /// Runs every step from the bucket's applied count to the end of the
    /// list, then records the list length as the new applied count.
    ///
    /// # Errors
    ///
    /// - `NotEnoughMigrations` if the list is shorter than the applied count
    /// - whatever the failing step returned, unchanged
    pub fn migrate<C, E>(
        &self,
        bucket: &Bucket<C>,
        migrations: &[Migration<C, E>],
    ) -> Result<MigrationReport, E>
    where
        C: RecordCodec,
        E: From<CoreError> + 'static,
    {
        let name = bucket.name();
        let applied = self.applied_count(bucket)?;
        let supplied = migrations.len() as u64;

        if supplied < applied {
            return Err(CoreError::NotEnoughMigrations { applied, supplied }.into());
        }
        if supplied == applied {
            debug!(bucket = %display_bytes(name), applied, "migrations up to date");
            return Ok(MigrationReport {
                from: applied,
                to: applied,
                steps: Vec::new(),
            });
        }

        let pending = &migrations[applied as usize..];
        debug!(
            bucket = %display_bytes(name),
            from = applied,
            to = supplied,
            mode = ?self.mode,
            "applying migrations"
        );

        let steps = match self.mode {
            MigrationMode::PerStep => {
                let mut steps = Vec::with_capacity(pending.len());
                for (index, migration) in (applied..).zip(pending) {
                    let report = bucket
                        .store()
                        .update(|txn| self.run_step(txn, bucket, index, migration))?;
                    steps.push(report);
                }
                bucket
                    .store()
                    .update(|txn| self.state.set_applied_count(txn, name, supplied))?;
                steps
            }
            MigrationMode::Atomic => bucket.store().update(|txn| {
                let mut steps = Vec::with_capacity(pending.len());
                for (index, migration) in (applied..).zip(pending) {
                    steps.push(self.run_step(txn, bucket, index, migration)?);
                }
                self.state.set_applied_count(txn, name, supplied)?;
                Ok::<_, E>(steps)
            })?,
        };

        info!(
            bucket = %display_bytes(name),
            from = applied,
            to = supplied,
            "migrations applied"
        );
        Ok(MigrationReport {
            from: applied,
            to: supplied,
            steps,
        })
    }

    fn run_step<C, E>(
        &self,
        txn: &mut WriteTxn,
        bucket: &Bucket<C>,
        index: u64,
        migration: &Migration<C, E>,
    ) -> Result<RewriteReport, E>
    where
        C: RecordCodec,
        E: From<CoreError> + 'static,
    {
        debug!(
            bucket = %display_bytes(bucket.name()),
            step = index,
            name = migration.name(),
            "running migration step"
        );
        migration
            .run_in(txn, bucket.name(), bucket.codec())
            .inspect_err(|_| {
                warn!(
                    bucket = %display_bytes(bucket.name()),
                    step = index,
                    name = migration.name(),
                    "migration step failed"
                );
            })
    }
}
