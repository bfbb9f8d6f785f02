//! # bucketdb codec
//!
//! Turns typed records into the opaque byte strings stored in a bucket and
//! back again, and encodes integer keys so their byte order matches their
//! numeric order.
//!
//! Two codecs ship with the crate:
//!
//! - [`CborCodec`] - compact binary encoding via `ciborium` (the default)
//! - [`JsonCodec`] - human-readable encoding via `serde_json`
//!
//! Both are deterministic: encoding equal values yields equal bytes, which
//! lets the bulk rewrite engine skip writes whose output did not change.
//!
//! ## Usage
//!
//! ```
//! use bucketdb_codec::{CborCodec, RecordCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Point {
//!     x: i64,
//!     y: i64,
//! }
//!
//! let codec = CborCodec;
//! let bytes = codec.encode(&Point { x: 1, y: 2 }).unwrap();
//! let back: Point = codec.decode(&bytes).unwrap();
//! assert_eq!(back, Point { x: 1, y: 2 });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod key;

pub use codec::{CborCodec, JsonCodec, RecordCodec};
pub use error::{CodecError, CodecResult};
pub use key::{decode_u64_key, encode_u64_key, U64_KEY_LEN};
