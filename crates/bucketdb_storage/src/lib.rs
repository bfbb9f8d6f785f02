//! # bucketdb storage
//!
//! Byte-level storage backends for bucketdb.
//!
//! The store keeps its durable state in an append-only commit log. This
//! crate provides the medium that log is written to. Backends are
//! **opaque byte stores**: they know nothing about frames, buckets or
//! records, they only read, append, flush and truncate.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - Shared in-process buffer, for tests and ephemeral stores
//! - [`FileBackend`] - A single file accessed through OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use bucketdb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"frame").unwrap();
//! assert_eq!(backend.read_at(offset, 5).unwrap(), b"frame");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
