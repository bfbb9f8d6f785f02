//! Cross-crate integration test helpers.
//!
//! [`BucketHarness`] drives a real [`Bucket`] and a plain `BTreeMap` model
//! side by side and checks that they agree.

use crate::generators::{expected_after_pass, Decision, Sample};
use bucketdb_core::{Bucket, CoreError, RewriteReport, Store, Transformed};
use std::collections::BTreeMap;

/// A test harness tracking expected bucket contents.
pub struct BucketHarness {
    /// The bucket under test.
    pub bucket: Bucket,
    model: BTreeMap<Vec<u8>, Sample>,
}

impl BucketHarness {
    /// Creates a harness over a fresh bucket in a new in-memory store.
    pub fn new() -> Self {
        let store = Store::open_in_memory().expect("Failed to open store");
        Self::with_store(&store, "harness")
    }

    /// Creates a harness over bucket `name` of `store`, which must be empty.
    pub fn with_store(store: &Store, name: &str) -> Self {
        let bucket = Bucket::open(store, name).expect("Failed to open bucket");
        assert!(
            bucket.is_empty().expect("Failed to count records"),
            "harness bucket must start empty"
        );
        Self {
            bucket,
            model: BTreeMap::new(),
        }
    }

    /// Creates a record and tracks it.
    pub fn create(&mut self, key: &[u8], record: Sample) {
        self.bucket
            .create(key, &record)
            .expect("Failed to create record");
        self.model.insert(key.to_vec(), record);
    }

    /// Creates every record in one batch and tracks them.
    pub fn seed(&mut self, records: &BTreeMap<Vec<u8>, Sample>) {
        let mut keys = records.keys();
        self.bucket
            .create_all(records.values(), |_, _| {
                Ok::<_, CoreError>(keys.next().cloned().unwrap_or_default())
            })
            .expect("Failed to seed records");
        self.model.extend(records.clone());
    }

    /// Deletes a record and updates tracking.
    pub fn delete(&mut self, key: &[u8]) {
        self.bucket.delete(key).expect("Failed to delete record");
        self.model.remove(key);
    }

    /// Runs a bulk pass where `decide` picks each record's fate, and
    /// updates tracking with what the pass should have done.
    ///
    /// Returns the pass result so callers can inspect failures.
    pub fn update_all<D>(&mut self, decide: D) -> Result<RewriteReport, CoreError>
    where
        D: Fn(&[u8]) -> Decision,
    {
        let expected = expected_after_pass(&self.model, &decide);
        let result = self.bucket.update_all(|key, record: Sample| {
            decide(key)
                .apply(key, record)
                .ok_or_else(|| CoreError::invalid_argument("decision failed the pass"))
        });

        match (&result, expected) {
            (Ok(_), Some(expected)) => self.model = expected,
            (Err(_), None) => {}
            (Ok(_), None) => panic!("pass succeeded although a decision failed"),
            (Err(e), Some(_)) => panic!("pass failed unexpectedly: {e}"),
        }
        result
    }

    /// Verifies the bucket holds exactly the tracked records.
    pub fn verify_all(&self) {
        let mut actual = BTreeMap::new();
        self.bucket
            .for_each(|key, record: Sample| {
                actual.insert(key.to_vec(), record);
                Ok::<_, CoreError>(())
            })
            .expect("Failed to read records");
        assert_eq!(actual, self.model, "bucket contents diverged from model");
    }

    /// Returns the tracked records.
    pub fn model(&self) -> &BTreeMap<Vec<u8>, Sample> {
        &self.model
    }

    /// Returns the count of tracked records.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

impl Default for BucketHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction integration checks.
pub mod transaction {
    use super::*;
    use bucketdb_core::RecordCodec;

    /// Checks that a view keeps seeing its snapshot while later writes
    /// commit.
    pub fn test_snapshot_isolation(store: &Store) {
        let bucket = Bucket::open(store, "isolation_test").expect("Failed to open bucket");
        bucket.create("k", &1u32).expect("Failed to create record");

        bucket
            .view(|view| {
                bucket
                    .update("k", |_: u32| Ok::<_, CoreError>(2))
                    .expect("Failed to update");
                let seen = view.get(b"k").map(<[u8]>::to_vec);
                let encoded = bucket.codec().encode(&1u32).expect("Failed to encode");
                assert_eq!(seen, Some(encoded));
                Ok::<_, CoreError>(())
            })
            .expect("Failed to view");

        assert_eq!(bucket.get::<u32>("k").expect("Failed to get"), 2);
    }

    /// Checks that an error inside a write transaction discards its writes.
    pub fn test_transaction_abort(store: &Store) {
        let bucket = Bucket::open(store, "abort_test").expect("Failed to open bucket");
        bucket
            .create("k", &"original")
            .expect("Failed to create record");

        let result: Result<(), CoreError> = bucket.update_raw(|raw| {
            raw.put(b"k", b"garbage")?;
            raw.put(b"other", b"garbage")?;
            Err(CoreError::invalid_argument("simulated abort"))
        });
        assert!(result.is_err());

        assert_eq!(
            bucket.get::<String>("k").expect("Failed to get"),
            "original"
        );
        assert_eq!(bucket.len().expect("Failed to count"), 1);
    }
}

/// Keeps every record under its key with identical contents.
pub fn keep_all(key: &[u8], record: Sample) -> Result<Transformed<Sample>, CoreError> {
    Ok(Transformed::write(key, record))
}
