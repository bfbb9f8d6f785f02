//! Record codec trait and the bundled implementations.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Reversible conversion between a typed record and its stored bytes.
///
/// Implementations must be deterministic: two equal records encode to the
/// same bytes. The bulk rewrite engine relies on this to detect records a
/// transform left untouched.
pub trait RecordCodec: Clone + Default + Send + Sync + 'static {
    /// Short name used in error messages.
    fn name(&self) -> &'static str;

    /// Encodes `record`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encoding`] when the record cannot be represented.
    fn encode<T: Serialize + ?Sized>(&self, record: &T) -> CodecResult<Vec<u8>>;

    /// Decodes `bytes` into a `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decoding`] when the bytes do not describe a `T`.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T>;
}

/// CBOR codec backed by `ciborium`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CborCodec;

impl RecordCodec for CborCodec {
    fn name(&self) -> &'static str {
        "cbor"
    }

    fn encode<T: Serialize + ?Sized>(&self, record: &T) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(record, &mut buf)
            .map_err(|e| CodecError::encoding(self.name(), e.to_string()))?;
        Ok(buf)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding(self.name(), e.to_string()))
    }
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl RecordCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize + ?Sized>(&self, record: &T) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(record).map_err(|e| CodecError::encoding(self.name(), e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::decoding(self.name(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: String,
        balance: i64,
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Renamed {
        new_key: String,
    }

    struct Unsupported;

    impl Serialize for Unsupported {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("unsupported type"))
        }
    }

    fn account() -> Account {
        Account {
            id: "ABC".into(),
            balance: 123,
        }
    }

    #[test]
    fn cbor_roundtrip() {
        let bytes = CborCodec.encode(&account()).unwrap();
        let back: Account = CborCodec.decode(&bytes).unwrap();
        assert_eq!(back, account());
    }

    #[test]
    fn json_layout_is_plain_json() {
        let bytes = JsonCodec.encode(&account()).unwrap();
        assert_eq!(bytes, br#"{"id":"ABC","balance":123}"#);
    }

    #[test]
    fn encoding_is_deterministic() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), 2);
        map.insert("a".to_string(), 1);

        assert_eq!(CborCodec.encode(&map).unwrap(), CborCodec.encode(&map.clone()).unwrap());
        assert_eq!(JsonCodec.encode(&map).unwrap(), JsonCodec.encode(&map.clone()).unwrap());
    }

    #[test]
    fn unsupported_type_fails_to_encode() {
        let err = CborCodec.encode(&Unsupported).unwrap_err();
        assert!(err.is_encoding());
        assert!(err.to_string().contains("unsupported type"));

        let err = JsonCodec.encode(&Unsupported).unwrap_err();
        assert!(err.is_encoding());
    }

    #[test]
    fn shape_mismatch_fails_to_decode() {
        let bytes = CborCodec.encode(&account()).unwrap();
        let err = CborCodec.decode::<Renamed>(&bytes).unwrap_err();
        assert!(err.is_decoding());

        let bytes = JsonCodec.encode(&account()).unwrap();
        let err = JsonCodec.decode::<Renamed>(&bytes).unwrap_err();
        assert_eq!(
            std::mem::discriminant(&err),
            std::mem::discriminant(&CodecError::decoding("json", ""))
        );
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(CborCodec.decode::<Account>(&[0xff, 0x00]).is_err());
        assert!(JsonCodec.decode::<Account>(b"{not json").is_err());
    }
}
