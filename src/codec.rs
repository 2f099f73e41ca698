use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Abstracts away the selection of the serialization format used for keys and values.
///
/// The cache treats encoded bytes as opaque; the only contract is that `deserialize`
/// inverts `serialize`.
pub trait RecordCodec {
    /// Short format name used in error messages.
    const FORMAT: &'static str;

    fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>>;

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}

/// Compact binary encoding. The default for file-backed caches.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl RecordCodec for BincodeCodec {
    const FORMAT: &'static str = "bincode";

    fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| Error::Codec {
            format: Self::FORMAT,
            reason: e.to_string(),
        })
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| Error::Codec {
            format: Self::FORMAT,
            reason: e.to_string(),
        })
    }
}

/// Human-readable encoding, handy when the log needs to be inspected by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl RecordCodec for JsonCodec {
    const FORMAT: &'static str = "json";

    fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::Codec {
            format: Self::FORMAT,
            reason: e.to_string(),
        })
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::Codec {
            format: Self::FORMAT,
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        hits: u32,
    }

    #[test]
    fn test_bincode_roundtrip() {
        let sample = Sample {
            name: "alpha".to_string(),
            hits: 7,
        };
        let bytes = BincodeCodec::serialize(&sample).unwrap();
        assert_eq!(BincodeCodec::deserialize::<Sample>(&bytes).unwrap(), sample);
    }

    #[test]
    fn test_json_is_readable() {
        let bytes = JsonCodec::serialize("a").unwrap();
        assert_eq!(bytes, b"\"a\"");
        assert_eq!(JsonCodec::deserialize::<String>(&bytes).unwrap(), "a");
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert_matches!(
            JsonCodec::deserialize::<Sample>(b"not json"),
            Err(Error::Codec { format: "json", .. })
        );
        assert_matches!(
            BincodeCodec::deserialize::<String>(&[0xFF]),
            Err(Error::Codec { format: "bincode", .. })
        );
    }
}
