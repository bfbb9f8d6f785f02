//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The codec rejected the record while encoding it.
    #[error("{codec} encoding failed: {message}")]
    Encoding {
        /// Name of the codec that failed.
        codec: &'static str,
        /// Description of the encoding error.
        message: String,
    },

    /// The stored bytes could not be decoded into the requested shape.
    #[error("{codec} decoding failed: {message}")]
    Decoding {
        /// Name of the codec that failed.
        codec: &'static str,
        /// Description of the decoding error.
        message: String,
    },

    /// A fixed-width integer key had the wrong length.
    #[error("invalid integer key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required length in bytes.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },
}

impl CodecError {
    /// Creates an encoding error.
    pub fn encoding(codec: &'static str, message: impl Into<String>) -> Self {
        Self::Encoding {
            codec,
            message: message.into(),
        }
    }

    /// Creates a decoding error.
    pub fn decoding(codec: &'static str, message: impl Into<String>) -> Self {
        Self::Decoding {
            codec,
            message: message.into(),
        }
    }

    /// Returns true for errors raised while encoding.
    #[must_use]
    pub fn is_encoding(&self) -> bool {
        matches!(self, Self::Encoding { .. })
    }

    /// Returns true for errors raised while decoding.
    #[must_use]
    pub fn is_decoding(&self) -> bool {
        matches!(self, Self::Decoding { .. })
    }
}
