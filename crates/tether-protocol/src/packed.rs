//! The packed-value envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data_map::DataMap;

/// A value after packing: the structural map, the JSON-compatible raw tree,
/// and the rejection flag.
///
/// The invariant: an envelope whose `map` is the identity performs no
/// transformation on `raw`. `throw` marks the payload as a thrown value
/// rather than a result; unpacking it raises instead of returning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedData {
    #[serde(
        default,
        skip_serializing_if = "DataMap::is_identity"
    )]
    pub map: DataMap,
    #[serde(default)]
    pub raw: Value,
    #[serde(default, skip_serializing_if = "std::ops::Not::not", rename = "throw")]
    pub throw: bool,
}

impl PackedData {
    /// An identity envelope around an already-JSON value.
    pub fn raw(raw: Value) -> Self {
        Self {
            map: DataMap::identity(),
            raw,
            throw: false,
        }
    }
}

/// The raw payload of an `'e'` envelope: the constructor name from the
/// closed wire set (or `None` for a generic error) merged with the packed
/// envelope of the error's message, stack, and own enumerable properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(flatten)]
    pub data: PackedData,
}

/// Encode a binary blob the way `'u8'`/`'ab'` envelopes carry it.
pub fn encode_binary(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode the base64 payload of a `'u8'`/`'ab'` envelope.
pub fn decode_binary(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_map::Tag;

    #[test]
    fn identity_envelope_omits_map_and_throw() {
        let env = PackedData::raw(serde_json::json!([1, 2, 3]));
        assert_eq!(serde_json::to_string(&env).unwrap(), r#"{"raw":[1,2,3]}"#);
    }

    #[test]
    fn tagged_envelope_round_trips() {
        let env = PackedData {
            map: DataMap::Tag(Tag::Date),
            raw: Value::String("2024-03-01T00:00:00.000Z".to_string()),
            throw: true,
        };
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(
            json,
            r#"{"map":"d","raw":"2024-03-01T00:00:00.000Z","throw":true}"#
        );
        let back: PackedData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn packed_error_flattens_its_envelope() {
        let err = PackedError {
            base: Some("TypeError".to_string()),
            data: PackedData::raw(serde_json::json!({"message": "nope"})),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["base"], "TypeError");
        assert_eq!(json["raw"]["message"], "nope");
        let back: PackedError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn binary_helpers_round_trip() {
        let bytes = [0u8, 1, 254, 255];
        let text = encode_binary(&bytes);
        assert_eq!(decode_binary(&text).unwrap(), bytes);
    }
}
