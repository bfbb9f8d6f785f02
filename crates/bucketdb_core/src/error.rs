//! Error types for bucketdb core.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in bucketdb core operations.
///
/// Operations that run caller-supplied closures are generic over the
/// caller's error type `E: From<CoreError>`, so an error produced by a
/// closure is handed back exactly as it was returned and never appears
/// here.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] bucketdb_storage::StorageError),

    /// Record codec error.
    #[error("codec error: {0}")]
    Codec(#[from] bucketdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested key is absent.
    #[error("record not found: {}", display_bytes(.key))]
    RecordNotFound {
        /// The key that was looked up.
        key: Vec<u8>,
    },

    /// A create-style operation targeted an occupied key.
    #[error("record already exists: {}", display_bytes(.key))]
    RecordAlreadyExists {
        /// The occupied key.
        key: Vec<u8>,
    },

    /// The bucket does not exist.
    #[error("bucket not found: {name}")]
    BucketNotFound {
        /// Name of the bucket.
        name: String,
    },

    /// The bucket already exists.
    #[error("bucket already exists: {name}")]
    BucketAlreadyExists {
        /// Name of the bucket.
        name: String,
    },

    /// Fewer migrations were supplied than are already applied.
    #[error("not enough migrations: {applied} already applied, {supplied} supplied")]
    NotEnoughMigrations {
        /// Applied count persisted for the bucket.
        applied: u64,
        /// Length of the supplied migration list.
        supplied: u64,
    },

    /// A caller passed an argument the operation cannot accept.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// The commit log is structurally invalid.
    #[error("commit log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A commit log frame failed its checksum.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the frame.
        expected: u32,
        /// Checksum computed over the frame.
        actual: u32,
    },

    /// The store directory is invalid or missing.
    #[error("invalid store: {message}")]
    InvalidStore {
        /// Description of the problem.
        message: String,
    },

    /// Another process holds the store lock.
    #[error("store locked: another process has exclusive access")]
    DatabaseLocked,

    /// The store has been closed.
    #[error("store is closed")]
    DatabaseClosed,

    /// No write transaction could be started within the configured timeout.
    #[error("timed out after {waited:?} waiting for the write lock")]
    WriteTimeout {
        /// How long the caller waited.
        waited: Duration,
    },
}

impl CoreError {
    /// Creates a record not found error.
    pub fn record_not_found(key: impl AsRef<[u8]>) -> Self {
        Self::RecordNotFound {
            key: key.as_ref().to_vec(),
        }
    }

    /// Creates a record already exists error.
    pub fn record_already_exists(key: impl AsRef<[u8]>) -> Self {
        Self::RecordAlreadyExists {
            key: key.as_ref().to_vec(),
        }
    }

    /// Creates a bucket not found error.
    pub fn bucket_not_found(name: impl AsRef<[u8]>) -> Self {
        Self::BucketNotFound {
            name: display_bytes(name.as_ref()),
        }
    }

    /// Creates a bucket already exists error.
    pub fn bucket_already_exists(name: impl AsRef<[u8]>) -> Self {
        Self::BucketAlreadyExists {
            name: display_bytes(name.as_ref()),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a commit log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid store error.
    pub fn invalid_store(message: impl Into<String>) -> Self {
        Self::InvalidStore {
            message: message.into(),
        }
    }

    /// Returns true if the error reports a missing record.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RecordNotFound { .. })
    }

    /// Returns true if the error reports an occupied key.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::RecordAlreadyExists { .. })
    }

    /// Returns true if the error came from the record codec.
    #[must_use]
    pub fn is_codec(&self) -> bool {
        matches!(self, Self::Codec(_))
    }
}

/// Renders a key or bucket name for messages: UTF-8 as text, anything
/// else as hex.
pub(crate) fn display_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
    }
}
