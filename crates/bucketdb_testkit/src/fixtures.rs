//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores
//! and the record shapes shared by the scenario tests.

use bucketdb_core::{Config, InMemoryBackend, Store};
use std::path::PathBuf;
use tempfile::TempDir;

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Store,
    kind: Kind,
}

enum Kind {
    Memory(InMemoryBackend),
    File(TempDir),
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        let backend = InMemoryBackend::new();
        let store = Store::open_with_backend(Config::default(), Box::new(backend.clone()))
            .expect("Failed to open in-memory store");
        Self {
            store,
            kind: Kind::Memory(backend),
        }
    }

    /// Creates a new store in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Store::open(&temp_dir.path().join("store")).expect("Failed to open file store");
        Self {
            store,
            kind: Kind::File(temp_dir),
        }
    }

    /// Returns the store directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        match &self.kind {
            Kind::File(dir) => Some(dir.path().join("store")),
            Kind::Memory(_) => None,
        }
    }

    /// Returns the commit log bytes of an in-memory store.
    pub fn log_bytes(&self) -> Option<Vec<u8>> {
        match &self.kind {
            Kind::Memory(backend) => Some(backend.data()),
            Kind::File(_) => None,
        }
    }

    /// Closes the store and opens it again from its commit log.
    ///
    /// Handles obtained before the call (buckets, clones of the store)
    /// keep pointing at the closed store.
    pub fn reopen(&mut self) {
        self.store.close().expect("Failed to close store");
        self.store = match &self.kind {
            Kind::Memory(backend) => {
                Store::open_with_backend(Config::default(), Box::new(backend.clone()))
                    .expect("Failed to reopen in-memory store")
            }
            Kind::File(dir) => {
                Store::open(&dir.path().join("store")).expect("Failed to reopen file store")
            }
        };
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
///
/// # Example
///
/// ```rust,ignore
/// use bucketdb_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         let bucket = Bucket::open(store, "test").unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Runs a test with a store in a temporary directory.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store, &std::path::Path) -> R,
{
    let test_store = TestStore::file();
    let path = test_store.path().expect("File store should have a path");
    f(&test_store.store, &path)
}

/// Record shapes and seeded buckets used across scenario tests.
pub mod scenarios {
    use bucketdb_core::{encode_u64_key, Bucket, Migration, Store, Transformed};
    use serde::{Deserialize, Serialize};

    /// A plain two-field record.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TestStruct {
        /// Identifier, also used as the key.
        #[serde(rename = "a")]
        pub id: String,
        /// Payload.
        #[serde(rename = "b")]
        pub data: String,
    }

    impl TestStruct {
        /// Creates a record.
        pub fn new(id: &str, data: &str) -> Self {
            Self {
                id: id.to_string(),
                data: data.to_string(),
            }
        }
    }

    /// The three records stored by [`test_struct_bucket`].
    pub fn test_structs() -> Vec<TestStruct> {
        vec![
            TestStruct::new("ABC", "123"),
            TestStruct::new("BCD", "234"),
            TestStruct::new("CDE", "345"),
        ]
    }

    /// Opens bucket `"bucket"` and stores [`test_structs`] keyed by id.
    pub fn test_struct_bucket(store: &Store) -> Bucket {
        let bucket = Bucket::open(store, "bucket").expect("Failed to open bucket");
        for record in test_structs() {
            bucket
                .create(&record.id, &record)
                .expect("Failed to create record");
        }
        bucket
    }

    /// Old record shape: numeric key and value.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Type1 {
        /// Numeric id, stored under its 8-byte big-endian encoding.
        #[serde(rename = "key")]
        pub k: u64,
        /// Numeric value.
        pub value: u64,
    }

    /// New record shape: string key and value.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Type2 {
        /// String id, stored under its UTF-8 bytes.
        #[serde(rename = "new_key")]
        pub k: String,
        /// String value.
        #[serde(rename = "new_value")]
        pub value: String,
    }

    /// Records stored by [`type1_bucket`].
    pub fn type1_records() -> Vec<Type1> {
        vec![
            Type1 { k: 1, value: 1 },
            Type1 { k: 2, value: 202 },
            Type1 { k: 3, value: 300 },
        ]
    }

    /// What [`type1_records`] look like after [`stringify_migration`].
    pub fn expected_type2() -> Vec<Type2> {
        vec![
            Type2 {
                k: "1".into(),
                value: "1".into(),
            },
            Type2 {
                k: "2".into(),
                value: "202".into(),
            },
            Type2 {
                k: "3".into(),
                value: "300".into(),
            },
        ]
    }

    /// Opens bucket `name` and stores [`type1_records`] keyed by
    /// `encode_u64_key(k)`.
    pub fn type1_bucket(store: &Store, name: &str) -> Bucket {
        let bucket = Bucket::open(store, name).expect("Failed to open bucket");
        for record in type1_records() {
            bucket
                .create(encode_u64_key(record.k), &record)
                .expect("Failed to create record");
        }
        bucket
    }

    /// Migration from [`Type1`] to [`Type2`], moving every record to the
    /// string form of its id.
    pub fn stringify_migration() -> Migration {
        Migration::new("stringify", |_key, old: Type1| {
            let k = old.k.to_string();
            Ok(Transformed::write(
                k.clone(),
                Type2 {
                    k,
                    value: old.value.to_string(),
                },
            ))
        })
    }

    /// Opens bucket `name` holding the numbers `1..=count`, each stored
    /// under its own 8-byte key.
    pub fn numbered_bucket(store: &Store, name: &str, count: u64) -> Bucket {
        let bucket = Bucket::open(store, name).expect("Failed to open bucket");
        bucket
            .create_all(1..=count, |n, _| {
                Ok::<_, bucketdb_core::CoreError>(encode_u64_key(*n).to_vec())
            })
            .expect("Failed to seed bucket");
        bucket
    }
}

#[cfg(test)]
mod tests {
    use super::scenarios::*;
    use super::*;
    use bucketdb_core::Bucket;

    #[test]
    fn test_memory_store() {
        let test_store = TestStore::memory();
        assert!(test_store.is_open());
        assert!(test_store.path().is_none());
    }

    #[test]
    fn test_with_temp_store() {
        with_temp_store(|store| {
            let bucket = Bucket::open(store, "test").unwrap();
            assert!(bucket.is_empty().unwrap());
        });
    }

    #[test]
    fn test_reopen_keeps_data() {
        for mut test_store in [TestStore::memory(), TestStore::file()] {
            test_struct_bucket(&test_store);
            test_store.reopen();

            let bucket = Bucket::open(&test_store, "bucket").unwrap();
            let all: Vec<TestStruct> = bucket.get_all().unwrap();
            assert_eq!(all, test_structs());
        }
    }

    #[test]
    fn test_seeded_scenarios() {
        with_temp_store(|store| {
            let bucket = type1_bucket(store, "things");
            assert_eq!(bucket.get_all::<Type1>().unwrap(), type1_records());

            let numbers = numbered_bucket(store, "numbers", 5);
            assert_eq!(numbers.get_all::<u64>().unwrap(), vec![1, 2, 3, 4, 5]);
        });
    }
}
