//! Immutable store state shared between transactions.

use crate::error::{display_bytes, CoreError, CoreResult};
use crate::store::log::LogOp;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Contents of one bucket.
#[derive(Debug, Clone, Default)]
pub(crate) struct BucketData {
    pub(crate) entries: BTreeMap<Vec<u8>, Vec<u8>>,
    pub(crate) sequence: u64,
}

/// All buckets as of one commit.
///
/// Buckets sit behind their own `Arc`, so cloning a snapshot is cheap and a
/// write transaction only copies the buckets it actually modifies.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    pub(crate) buckets: BTreeMap<Vec<u8>, Arc<BucketData>>,
}

impl Snapshot {
    /// Replays one logged operation.
    pub(crate) fn apply(&mut self, op: LogOp) -> CoreResult<()> {
        match op {
            LogOp::CreateBucket { name } => {
                if self.buckets.contains_key(&name) {
                    return Err(CoreError::log_corruption(format!(
                        "bucket {} created twice",
                        display_bytes(&name)
                    )));
                }
                self.buckets.insert(name, Arc::default());
            }
            LogOp::DeleteBucket { name } => {
                if self.buckets.remove(&name).is_none() {
                    return Err(missing_bucket(&name));
                }
            }
            LogOp::Put { bucket, key, value } => {
                self.bucket_mut(&bucket)?.entries.insert(key, value);
            }
            LogOp::Delete { bucket, key } => {
                self.bucket_mut(&bucket)?.entries.remove(&key);
            }
            LogOp::SetSequence { bucket, sequence } => {
                self.bucket_mut(&bucket)?.sequence = sequence;
            }
        }
        Ok(())
    }

    fn bucket_mut(&mut self, name: &[u8]) -> CoreResult<&mut BucketData> {
        self.buckets
            .get_mut(name)
            .map(Arc::make_mut)
            .ok_or_else(|| missing_bucket(name))
    }
}

fn missing_bucket(name: &[u8]) -> CoreError {
    CoreError::log_corruption(format!(
        "operation on unknown bucket {}",
        display_bytes(name)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(bucket: &str, key: &str, value: &str) -> LogOp {
        LogOp::Put {
            bucket: bucket.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    #[test]
    fn replay_builds_buckets() {
        let mut snapshot = Snapshot::default();
        snapshot
            .apply(LogOp::CreateBucket { name: b"a".to_vec() })
            .unwrap();
        snapshot.apply(put("a", "k1", "v1")).unwrap();
        snapshot.apply(put("a", "k2", "v2")).unwrap();
        snapshot
            .apply(LogOp::Delete {
                bucket: b"a".to_vec(),
                key: b"k1".to_vec(),
            })
            .unwrap();
        snapshot
            .apply(LogOp::SetSequence {
                bucket: b"a".to_vec(),
                sequence: 7,
            })
            .unwrap();

        let bucket = &snapshot.buckets[b"a".as_slice()];
        assert_eq!(bucket.entries.len(), 1);
        assert_eq!(bucket.entries[b"k2".as_slice()], b"v2");
        assert_eq!(bucket.sequence, 7);
    }

    #[test]
    fn clones_are_copy_on_write() {
        let mut base = Snapshot::default();
        base.apply(LogOp::CreateBucket { name: b"a".to_vec() })
            .unwrap();
        base.apply(put("a", "k", "old")).unwrap();

        let mut next = base.clone();
        next.apply(put("a", "k", "new")).unwrap();

        assert_eq!(base.buckets[b"a".as_slice()].entries[b"k".as_slice()], b"old");
        assert_eq!(next.buckets[b"a".as_slice()].entries[b"k".as_slice()], b"new");
    }

    #[test]
    fn unknown_bucket_is_corruption() {
        let mut snapshot = Snapshot::default();
        assert!(matches!(
            snapshot.apply(put("missing", "k", "v")),
            Err(CoreError::LogCorruption { .. })
        ));
        assert!(matches!(
            snapshot.apply(LogOp::DeleteBucket {
                name: b"missing".to_vec()
            }),
            Err(CoreError::LogCorruption { .. })
        ));
    }
}
