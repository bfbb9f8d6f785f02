//! # bucketdb Testkit
//!
//! Test utilities for bucketdb.
//!
//! This crate provides:
//! - Store fixtures and seeded buckets
//! - Property-based test generators using proptest
//! - A model-checking harness for bucket operations
//! - Crash simulation over the commit log backend
//! - Concurrent stress helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bucketdb_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_temp_store(|store| {
//!         let bucket = Bucket::open(store, "test").unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
    pub use bucketdb_core::{Bucket, CoreError, Store, Transformed};
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
