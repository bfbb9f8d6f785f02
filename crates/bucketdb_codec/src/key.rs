//! Fixed-width integer keys.
//!
//! Keys are compared as raw bytes, so integers are stored big-endian:
//! ascending cursor order then equals ascending numeric order.

use crate::error::{CodecError, CodecResult};

/// Width of an encoded integer key.
pub const U64_KEY_LEN: usize = 8;

/// Encodes `value` as an 8-byte big-endian key.
#[must_use]
pub const fn encode_u64_key(value: u64) -> [u8; U64_KEY_LEN] {
    value.to_be_bytes()
}

/// Decodes an 8-byte big-endian key.
///
/// # Errors
///
/// Returns [`CodecError::InvalidKeyLength`] unless `bytes` is exactly
/// [`U64_KEY_LEN`] long.
pub fn decode_u64_key(bytes: &[u8]) -> CodecResult<u64> {
    let array: [u8; U64_KEY_LEN] = bytes.try_into().map_err(|_| CodecError::InvalidKeyLength {
        expected: U64_KEY_LEN,
        actual: bytes.len(),
    })?;
    Ok(u64::from_be_bytes(array))
}
