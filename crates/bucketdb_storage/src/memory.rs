//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// Clones share the same underlying buffer. Tests keep one clone around,
/// drop the store that owns the other and reopen against the same bytes
/// to exercise recovery without touching the file system.
///
/// # Example
///
/// ```rust
/// use bucketdb_storage::{InMemoryBackend, StorageBackend};
///
/// let mut backend = InMemoryBackend::new();
/// let observer = backend.clone();
/// backend.append(b"abc").unwrap();
/// assert_eq!(observer.data(), b"abc");
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding pre-existing bytes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the buffer.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites the buffer, e.g. to simulate corruption.
    pub fn replace(&self, data: Vec<u8>) {
        *self.data.write() = data;
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        // Bounds checked above, both fit in usize.
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;

        if new_size > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            });
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_offsets() {
        let mut backend = InMemoryBackend::new();

        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
    }

    #[test]
    fn read_at_returns_written_bytes() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello world").unwrap();

        assert_eq!(backend.read_at(6, 5).unwrap(), b"world");
        assert!(backend.read_at(2, 0).unwrap().is_empty());
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            backend.read_at(10, 0),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn clones_share_buffer() {
        let mut writer = InMemoryBackend::new();
        let reader = writer.clone();

        writer.append(b"shared").unwrap();
        assert_eq!(reader.read_all().unwrap(), b"shared");

        reader.replace(b"xx".to_vec());
        assert_eq!(writer.size().unwrap(), 2);
    }

    #[test]
    fn truncate_drops_tail() {
        let mut backend = InMemoryBackend::with_data(b"hello world".to_vec());

        backend.truncate(5).unwrap();
        assert_eq!(backend.data(), b"hello");

        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::InvalidTruncate {
                requested: 100,
                size: 5
            })
        ));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Op {
            Append(Vec<u8>),
            Truncate(usize),
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                3 => prop::collection::vec(any::<u8>(), 0..32).prop_map(Op::Append),
                1 => (0usize..128).prop_map(Op::Truncate),
            ]
        }

        proptest! {
            #[test]
            fn matches_plain_buffer(ops in prop::collection::vec(op_strategy(), 0..40)) {
                let mut backend = InMemoryBackend::new();
                let mut model: Vec<u8> = Vec::new();

                for op in ops {
                    match op {
                        Op::Append(bytes) => {
                            let offset = backend.append(&bytes).unwrap();
                            prop_assert_eq!(offset, model.len() as u64);
                            model.extend_from_slice(&bytes);
                        }
                        Op::Truncate(len) => {
                            let result = backend.truncate(len as u64);
                            if len > model.len() {
                                prop_assert!(result.is_err());
                            } else {
                                prop_assert!(result.is_ok());
                                model.truncate(len);
                            }
                        }
                    }
                    prop_assert_eq!(backend.size().unwrap(), model.len() as u64);
                }

                prop_assert_eq!(backend.read_all().unwrap(), model.clone());
                for start in 0..model.len() {
                    let tail = backend.read_at(start as u64, model.len() - start).unwrap();
                    prop_assert_eq!(&tail[..], &model[start..]);
                }
            }
        }
    }
}
