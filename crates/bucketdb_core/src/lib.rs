//! # bucketdb Core
//!
//! Typed buckets, bulk rewrites and migrations over an embedded ordered
//! key-value store.
//!
//! This crate provides:
//! - [`Store`]: named buckets of ordered byte keys, single-writer
//!   transactions and a checksummed commit log
//! - [`Bucket`]: single-record create/get/update/delete/find over `serde`
//!   records
//! - [`bulk`]: atomic scan-and-rewrite of a whole bucket, including key
//!   renames and deletions
//! - [`migration`]: ordered migration lists with a durable applied count
//!   per bucket

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bucket;
pub mod bulk;
mod config;
mod dir;
mod error;
pub mod migration;
mod stats;
mod store;

pub use bucket::{Bucket, Keyed, SequenceSource};
pub use bulk::{RewriteReport, StagedMutations, Transformed};
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use migration::{
    Migration, MigrationMode, MigrationReport, MigrationStateStore, Migrator,
    ReservedBucketState, MIGRATIONS_BUCKET,
};
pub use stats::{StatsSnapshot, StoreStats};
pub use store::{BucketMut, BucketView, Buckets, Cursor, ReadTxn, Store, WriteTxn};

pub use bucketdb_codec::{
    decode_u64_key, encode_u64_key, CborCodec, CodecError, JsonCodec, RecordCodec,
};
pub use bucketdb_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};
