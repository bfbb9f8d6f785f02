//! Typed record access to one bucket.
//!
//! [`Bucket`] pairs a store, a bucket name and a [`RecordCodec`]. Records
//! are any `serde` type; keys are raw bytes, so anything `AsRef<[u8]>`
//! (strings, byte slices, [`encode_u64_key`](bucketdb_codec::encode_u64_key)
//! output) can be used.
//!
//! ```rust,ignore
//! use bucketdb_core::{Bucket, Store};
//!
//! let store = Store::open(Path::new("data"))?;
//! let users = Bucket::open(&store, "users")?;
//!
//! users.create("alice", &User { name: "Alice".into(), age: 30 })?;
//! users.update("alice", |mut u: User| { u.age += 1; Ok::<_, CoreError>(u) })?;
//! let alice: User = users.get("alice")?;
//! ```

use crate::bulk::{rewrite_in, RewriteReport, Transformed};
use crate::error::{CoreError, CoreResult};
use crate::migration::{Migration, MigrationReport, Migrator, MIGRATIONS_BUCKET};
use crate::store::{BucketMut, BucketView, Store};
use bucketdb_codec::{CborCodec, RecordCodec};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Hands out per-bucket sequence numbers while keys are being chosen.
pub trait SequenceSource {
    /// Advances the counter and returns the new value.
    fn next_sequence(&mut self) -> u64;

    /// Returns the last value handed out, zero if none.
    fn sequence(&self) -> u64;
}

impl SequenceSource for BucketMut<'_> {
    fn next_sequence(&mut self) -> u64 {
        BucketMut::next_sequence(self)
    }

    fn sequence(&self) -> u64 {
        BucketMut::sequence(self)
    }
}

/// A record that knows the key it is stored under.
pub trait Keyed {
    /// Returns the record's key.
    fn key(&self) -> Vec<u8>;
}

/// Handle on a named bucket of `serde` records.
///
/// Cloning is cheap. Every method runs in its own transaction.
#[derive(Debug, Clone)]
pub struct Bucket<C = CborCodec> {
    store: Store,
    name: Vec<u8>,
    codec: C,
}

impl Bucket<CborCodec> {
    /// Opens the bucket `name`, creating it if needed, with the CBOR codec.
    pub fn open(store: &Store, name: impl AsRef<[u8]>) -> CoreResult<Self> {
        Self::open_with_codec(store, name, CborCodec)
    }
}

impl<C: RecordCodec> Bucket<C> {
    /// Opens the bucket `name`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty name or the reserved
    /// migrations bucket.
    pub fn open_with_codec(store: &Store, name: impl AsRef<[u8]>, codec: C) -> CoreResult<Self> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(CoreError::invalid_argument("bucket name must not be empty"));
        }
        if name == MIGRATIONS_BUCKET {
            return Err(CoreError::invalid_argument(
                "the migrations bucket is reserved",
            ));
        }

        store.update(|txn| txn.create_bucket_if_not_exists(name).map(drop))?;

        Ok(Self {
            store: store.clone(),
            name: name.to_vec(),
            codec,
        })
    }

    /// Returns the bucket name.
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Returns the store this bucket lives in.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Returns the record codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Runs `f` against a read-only view of the bucket.
    pub fn view<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(BucketView<'_>) -> Result<R, E>,
        E: From<CoreError>,
    {
        self.store.view(|txn| {
            let bucket = txn
                .bucket(&self.name)
                .ok_or_else(|| CoreError::bucket_not_found(&self.name))?;
            f(bucket)
        })
    }

    /// Runs `f` against the bucket in a write transaction.
    ///
    /// Everything `f` writes commits together, or not at all if it returns
    /// `Err`.
    pub fn update_raw<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut BucketMut<'_>) -> Result<R, E>,
        E: From<CoreError>,
    {
        self.store.update(|txn| {
            let mut bucket = txn
                .bucket_mut(&self.name)
                .ok_or_else(|| CoreError::bucket_not_found(&self.name))?;
            f(&mut bucket)
        })
    }

    /// Stores a new record under `key`.
    ///
    /// # Errors
    ///
    /// Returns `RecordAlreadyExists` if `key` is taken.
    pub fn create<T>(&self, key: impl AsRef<[u8]>, record: &T) -> CoreResult<()>
    where
        T: Serialize + ?Sized,
    {
        let key = key.as_ref();
        let value = self.codec.encode(record)?;
        self.update_raw(|bucket| {
            if bucket.contains(key) {
                return Err(CoreError::record_already_exists(key));
            }
            bucket.put(key, &value)
        })
    }

    /// Stores many new records in one transaction.
    ///
    /// `key_fn` picks each record's key and may draw from the bucket's
    /// sequence. If any key is empty or already taken, including by an
    /// earlier record of the same batch, nothing is stored.
    ///
    /// Returns the number of records stored.
    pub fn create_all<T, I, E, F>(&self, records: I, mut key_fn: F) -> Result<usize, E>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
        E: From<CoreError>,
        F: FnMut(&T, &mut dyn SequenceSource) -> Result<Vec<u8>, E>,
    {
        self.update_raw(|bucket| {
            let mut stored = 0;
            for record in records {
                let key = key_fn(&record, &mut *bucket)?;
                if key.is_empty() {
                    return Err(CoreError::invalid_argument("key must not be empty").into());
                }
                if bucket.contains(&key) {
                    return Err(CoreError::record_already_exists(&key).into());
                }
                let value = self.codec.encode(&record).map_err(CoreError::from)?;
                bucket.put(&key, &value)?;
                stored += 1;
            }
            Ok(stored)
        })
    }

    /// Returns the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if `key` is absent.
    pub fn get<T: DeserializeOwned>(&self, key: impl AsRef<[u8]>) -> CoreResult<T> {
        let key = key.as_ref();
        self.try_get(key)?
            .ok_or_else(|| CoreError::record_not_found(key))
    }

    /// Returns the record stored under `key`, if any.
    pub fn try_get<T: DeserializeOwned>(&self, key: impl AsRef<[u8]>) -> CoreResult<Option<T>> {
        let key = key.as_ref();
        self.view(|bucket| {
            let record = bucket
                .get(key)
                .map(|raw| self.codec.decode(raw))
                .transpose()?;
            Ok(record)
        })
    }

    /// Returns every record in ascending key order.
    pub fn get_all<T: DeserializeOwned>(&self) -> CoreResult<Vec<T>> {
        self.view(|bucket| {
            bucket
                .iter()
                .map(|(_, raw)| self.codec.decode(raw).map_err(CoreError::from))
                .collect()
        })
    }

    /// Calls `f` with every key and record in ascending key order,
    /// stopping at the first error.
    pub fn for_each<T, E, F>(&self, mut f: F) -> Result<(), E>
    where
        T: DeserializeOwned,
        E: From<CoreError>,
        F: FnMut(&[u8], T) -> Result<(), E>,
    {
        self.view(|bucket| {
            for (key, raw) in bucket.iter() {
                let record = self.codec.decode(raw).map_err(CoreError::from)?;
                f(key, record)?;
            }
            Ok(())
        })
    }

    /// Returns the first record, in key order, for which `predicate`
    /// returns true.
    pub fn find<T, E, F>(&self, mut predicate: F) -> Result<Option<(Vec<u8>, T)>, E>
    where
        T: DeserializeOwned,
        E: From<CoreError>,
        F: FnMut(&[u8], &T) -> Result<bool, E>,
    {
        self.view(|bucket| {
            for (key, raw) in bucket.iter() {
                let record = self.codec.decode(raw).map_err(CoreError::from)?;
                if predicate(key, &record)? {
                    return Ok(Some((key.to_vec(), record)));
                }
            }
            Ok(None)
        })
    }

    /// Replaces the record under `key` with `f(old)`. The key never changes.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if `key` is absent. Errors from `f` are
    /// returned unchanged and leave the record as it was.
    pub fn update<T, E, F>(&self, key: impl AsRef<[u8]>, f: F) -> Result<(), E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CoreError>,
        F: FnOnce(T) -> Result<T, E>,
    {
        let key = key.as_ref();
        self.update_raw(|bucket| {
            let raw = bucket
                .get(key)
                .ok_or_else(|| CoreError::record_not_found(key))?;
            let record: T = self.codec.decode(raw).map_err(CoreError::from)?;
            let updated = f(record)?;
            let value = self.codec.encode(&updated).map_err(CoreError::from)?;
            bucket.put(key, &value)?;
            Ok(())
        })
    }

    /// Replaces the record under `key` with `f(old)` and stores it under
    /// the key the new record reports, moving it if that key differs.
    ///
    /// A record already stored under the new key is replaced. Returns the
    /// key the record ends up under.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if `key` is absent and `InvalidArgument` if
    /// the new record's key is empty.
    pub fn update_keyed<T, E, F>(&self, key: impl AsRef<[u8]>, f: F) -> Result<Vec<u8>, E>
    where
        T: Keyed + Serialize + DeserializeOwned,
        E: From<CoreError>,
        F: FnOnce(T) -> Result<T, E>,
    {
        let key = key.as_ref();
        self.update_raw(|bucket| {
            let raw = bucket
                .get(key)
                .ok_or_else(|| CoreError::record_not_found(key))?;
            let record: T = self.codec.decode(raw).map_err(CoreError::from)?;
            let updated = f(record)?;

            let new_key = updated.key();
            if new_key.is_empty() {
                return Err(CoreError::invalid_argument("key must not be empty").into());
            }
            let value = self.codec.encode(&updated).map_err(CoreError::from)?;
            if new_key != key {
                bucket.delete(key);
            }
            bucket.put(&new_key, &value)?;
            Ok(new_key)
        })
    }

    /// Stores a new record under its own key.
    ///
    /// # Errors
    ///
    /// Returns `RecordAlreadyExists` if the key is taken.
    pub fn create_keyed<T>(&self, record: &T) -> CoreResult<()>
    where
        T: Keyed + Serialize,
    {
        self.create(record.key(), record)
    }

    /// Removes the record under `key`.
    ///
    /// # Errors
    ///
    /// Returns `RecordNotFound` if `key` is absent.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> CoreResult<()> {
        let key = key.as_ref();
        self.update_raw(|bucket| {
            if bucket.delete(key) {
                Ok(())
            } else {
                Err(CoreError::record_not_found(key))
            }
        })
    }

    /// Advances the bucket's durable sequence and returns the new value.
    pub fn next_sequence(&self) -> CoreResult<u64> {
        self.update_raw(|bucket| Ok(bucket.next_sequence()))
    }

    /// Returns the number of records.
    pub fn len(&self) -> CoreResult<usize> {
        self.view(|bucket| Ok(bucket.len()))
    }

    /// Returns true if the bucket holds no records.
    pub fn is_empty(&self) -> CoreResult<bool> {
        self.view(|bucket| Ok(bucket.is_empty()))
    }

    /// Returns every key in ascending order.
    pub fn keys(&self) -> CoreResult<Vec<Vec<u8>>> {
        self.view(|bucket| Ok(bucket.iter().map(|(key, _)| key.to_vec()).collect()))
    }

    /// Rewrites every record in one atomic pass.
    ///
    /// Records are decoded as `T` and `transform` decides, per record,
    /// whether to keep it (possibly under a new key) as a `U` or delete it.
    /// See [`crate::bulk`] for the exact semantics.
    pub fn update_all<T, U, E, F>(&self, transform: F) -> Result<RewriteReport, E>
    where
        T: DeserializeOwned,
        U: Serialize,
        E: From<CoreError>,
        F: FnMut(&[u8], T) -> Result<Transformed<U>, E>,
    {
        self.store
            .update(|txn| rewrite_in(txn, &self.name, &self.codec, transform))
    }

    /// Applies the pending part of `migrations` using the default
    /// [`Migrator`].
    pub fn migrate<E>(&self, migrations: &[Migration<C, E>]) -> Result<MigrationReport, E>
    where
        E: From<CoreError> + 'static,
    {
        Migrator::new().migrate(self, migrations)
    }

    /// Returns how many migrations have been applied to this bucket.
    pub fn applied_migrations(&self) -> CoreResult<u64> {
        Migrator::new().applied_count(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketdb_codec::{decode_u64_key, encode_u64_key, JsonCodec};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestStruct {
        #[serde(rename = "a")]
        id: String,
        #[serde(rename = "b")]
        data: String,
    }

    fn ts(id: &str, data: &str) -> TestStruct {
        TestStruct {
            id: id.to_string(),
            data: data.to_string(),
        }
    }

    fn seeded() -> Bucket {
        let store = Store::open_in_memory().unwrap();
        let bucket = Bucket::open(&store, "bucket").unwrap();
        for record in [ts("ABC", "123"), ts("BCD", "234"), ts("CDE", "345")] {
            bucket.create(&record.id, &record).unwrap();
        }
        bucket
    }

    #[test]
    fn open_rejects_bad_names() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            Bucket::open(&store, ""),
            Err(CoreError::InvalidArgument { .. })
        ));
        assert!(matches!(
            Bucket::open(&store, MIGRATIONS_BUCKET),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn open_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let first = Bucket::open(&store, "b").unwrap();
        first.create("k", &1u32).unwrap();

        let second = Bucket::open(&store, "b").unwrap();
        assert_eq!(second.get::<u32>("k").unwrap(), 1);
    }

    #[test]
    fn create_and_get() {
        let bucket = seeded();
        assert_eq!(bucket.get::<TestStruct>("BCD").unwrap(), ts("BCD", "234"));
        assert_eq!(bucket.len().unwrap(), 3);
    }

    #[test]
    fn create_duplicate_fails() {
        let bucket = seeded();
        let err = bucket.create("ABC", &ts("ABC", "999")).unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(bucket.get::<TestStruct>("ABC").unwrap().data, "123");
    }

    #[test]
    fn get_missing() {
        let bucket = seeded();
        assert!(bucket.get::<TestStruct>("XYZ").unwrap_err().is_not_found());
        assert_eq!(bucket.try_get::<TestStruct>("XYZ").unwrap(), None);
    }

    #[test]
    fn get_all_is_ordered() {
        let bucket = seeded();
        let all: Vec<TestStruct> = bucket.get_all().unwrap();
        assert_eq!(
            all,
            vec![ts("ABC", "123"), ts("BCD", "234"), ts("CDE", "345")]
        );
    }

    #[test]
    fn wrong_shape_is_codec_error() {
        let bucket = seeded();
        assert!(bucket.get::<u64>("ABC").unwrap_err().is_codec());
    }

    #[test]
    fn for_each_visits_in_order() {
        let bucket = seeded();
        let mut keys = Vec::new();
        bucket
            .for_each(|key, record: TestStruct| {
                assert_eq!(key, record.id.as_bytes());
                keys.push(record.id);
                Ok::<_, CoreError>(())
            })
            .unwrap();
        assert_eq!(keys, vec!["ABC", "BCD", "CDE"]);
    }

    #[test]
    fn find_stops_at_first_match() {
        let bucket = seeded();
        let mut visited = 0;
        let found = bucket
            .find(|_, record: &TestStruct| {
                visited += 1;
                Ok::<_, CoreError>(record.data.starts_with('2'))
            })
            .unwrap();

        assert_eq!(found, Some((b"BCD".to_vec(), ts("BCD", "234"))));
        assert_eq!(visited, 2);

        let none = bucket
            .find(|_, record: &TestStruct| Ok::<_, CoreError>(record.data.is_empty()))
            .unwrap();
        assert_eq!(none, None);
    }

    #[test]
    fn update_single_record() {
        let bucket = seeded();
        bucket
            .update("ABC", |mut record: TestStruct| {
                record.data = "999".to_string();
                Ok::<_, CoreError>(record)
            })
            .unwrap();
        assert_eq!(bucket.get::<TestStruct>("ABC").unwrap().data, "999");

        let err = bucket
            .update("XYZ", |record: TestStruct| Ok::<_, CoreError>(record))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn update_error_keeps_record() {
        let bucket = seeded();
        let result = bucket.update("ABC", |_: TestStruct| {
            Err::<TestStruct, _>(CoreError::invalid_argument("no"))
        });
        assert!(result.is_err());
        assert_eq!(bucket.get::<TestStruct>("ABC").unwrap().data, "123");
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        handle: String,
        balance: u64,
    }

    impl Keyed for Account {
        fn key(&self) -> Vec<u8> {
            self.handle.clone().into_bytes()
        }
    }

    #[test]
    fn update_keyed_moves_record() {
        let store = Store::open_in_memory().unwrap();
        let bucket = Bucket::open(&store, "accounts").unwrap();
        bucket
            .create_keyed(&Account {
                handle: "old".into(),
                balance: 5,
            })
            .unwrap();

        let key = bucket
            .update_keyed("old", |mut account: Account| {
                account.handle = "new".into();
                account.balance += 1;
                Ok::<_, CoreError>(account)
            })
            .unwrap();

        assert_eq!(key, b"new");
        assert_eq!(bucket.keys().unwrap(), vec![b"new".to_vec()]);
        assert_eq!(bucket.get::<Account>("new").unwrap().balance, 6);
    }

    #[test]
    fn update_keyed_in_place() {
        let store = Store::open_in_memory().unwrap();
        let bucket = Bucket::open(&store, "accounts").unwrap();
        let account = Account {
            handle: "a".into(),
            balance: 1,
        };
        bucket.create_keyed(&account).unwrap();
        assert!(bucket.create_keyed(&account).unwrap_err().is_already_exists());

        bucket
            .update_keyed("a", |mut account: Account| {
                account.balance = 9;
                Ok::<_, CoreError>(account)
            })
            .unwrap();
        assert_eq!(bucket.len().unwrap(), 1);
        assert_eq!(bucket.get::<Account>("a").unwrap().balance, 9);
    }

    #[test]
    fn delete_record() {
        let bucket = seeded();
        bucket.delete("BCD").unwrap();
        assert_eq!(bucket.len().unwrap(), 2);
        assert!(bucket.delete("BCD").unwrap_err().is_not_found());
    }

    #[test]
    fn create_all_with_sequence_keys() {
        let bucket = seeded();
        let stored = bucket
            .create_all(
                vec![ts("x", "1"), ts("y", "2")],
                |_, seq: &mut dyn SequenceSource| {
                    Ok::<_, CoreError>(encode_u64_key(seq.next_sequence()).to_vec())
                },
            )
            .unwrap();
        assert_eq!(stored, 2);

        let keys = bucket.keys().unwrap();
        let numbered: Vec<u64> = keys
            .iter()
            .filter(|k| k.len() == 8)
            .map(|k| decode_u64_key(k).unwrap())
            .collect();
        assert_eq!(numbered, vec![1, 2]);
        assert_eq!(bucket.next_sequence().unwrap(), 3);
    }

    #[test]
    fn create_all_is_all_or_nothing() {
        let bucket = seeded();

        let err = bucket
            .create_all(vec![ts("NEW", "1"), ts("ABC", "2")], |r, _| {
                Ok::<_, CoreError>(r.id.clone().into_bytes())
            })
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(bucket.try_get::<TestStruct>("NEW").unwrap(), None);

        let err = bucket
            .create_all(vec![ts("DUP", "1"), ts("DUP", "2")], |r, _| {
                Ok::<_, CoreError>(r.id.clone().into_bytes())
            })
            .unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(bucket.len().unwrap(), 3);
    }

    #[test]
    fn create_all_empty_is_noop() {
        let bucket = seeded();
        let stored = bucket
            .create_all(Vec::<TestStruct>::new(), |_, _| {
                Ok::<_, CoreError>(b"never".to_vec())
            })
            .unwrap();
        assert_eq!(stored, 0);
        assert_eq!(bucket.len().unwrap(), 3);
    }

    #[test]
    fn sequence_rolls_back_with_failed_batch() {
        let bucket = seeded();
        let result = bucket.create_all(vec![ts("a", "1")], |_, seq| {
            seq.next_sequence();
            Err::<Vec<u8>, _>(CoreError::invalid_argument("stop"))
        });
        assert!(result.is_err());
        assert_eq!(bucket.next_sequence().unwrap(), 1);
    }

    #[test]
    fn json_codec_bucket() {
        let store = Store::open_in_memory().unwrap();
        let bucket = Bucket::open_with_codec(&store, "json", JsonCodec).unwrap();
        bucket.create("k", &ts("k", "v")).unwrap();

        let raw = bucket
            .view(|view| Ok::<_, CoreError>(view.get(b"k").map(<[u8]>::to_vec)))
            .unwrap();
        assert_eq!(raw, Some(br#"{"a":"k","b":"v"}"#.to_vec()));
    }

    #[test]
    fn update_all_delete_one_of_five() {
        let store = Store::open_in_memory().unwrap();
        let bucket = Bucket::open(&store, "five").unwrap();
        for i in 1..=5u64 {
            bucket.create(encode_u64_key(i), &i).unwrap();
        }
        let before = store.stats().snapshot();

        let report = bucket
            .update_all(|key, n: u64| {
                if n == 3 {
                    Ok::<_, CoreError>(Transformed::Delete)
                } else {
                    Ok(Transformed::write(key, n))
                }
            })
            .unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.unchanged, 4);
        assert_eq!(store.stats().snapshot().puts, before.puts);
        assert_eq!(bucket.get_all::<u64>().unwrap(), vec![1, 2, 4, 5]);
    }
}
