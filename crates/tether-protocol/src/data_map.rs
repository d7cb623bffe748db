//! The structural tag tree describing per-field value transformations.
//!
//! Rather than shipping type tags inline with every scalar, the codec
//! computes a single [`DataMap`] that matches the shape of the packed value
//! and is empty (`""`) wherever no transformation is needed. A receiver
//! descends through the matching sub-map for containers and passes raw
//! sub-trees untouched where the map is the identity.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Scalar transformation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tag {
    /// No transformation; `raw` is the value.
    #[serde(rename = "")]
    Identity,
    /// Unsupported type; unpacking always fails.
    #[serde(rename = "?")]
    Unsupported,
    /// `undefined` (raw is `null`).
    #[serde(rename = "u")]
    Undefined,
    /// Date, as an ISO 8601 string.
    #[serde(rename = "d")]
    Date,
    /// Error, as a [`PackedError`](crate::PackedError) payload.
    #[serde(rename = "e")]
    Error,
    /// Bridgeable object reference, as a signed packed id (`null` if closed).
    #[serde(rename = "o")]
    Object,
    /// Shared constant, as its share id string.
    #[serde(rename = "s")]
    Shared,
    /// Non-finite float, as `"NaN"`, `"Infinity"` or `"-Infinity"`.
    #[serde(rename = "f")]
    NonFinite,
    /// Byte array, base64-encoded.
    #[serde(rename = "u8")]
    Bytes,
    /// Raw buffer, base64-encoded.
    #[serde(rename = "ab")]
    Buffer,
    /// Keyed map, as a packed array of `[key, value]` entries.
    #[serde(rename = "M")]
    Map,
    /// Set, as a packed array of members.
    #[serde(rename = "S")]
    Set,
}

/// The tag tree attached to a packed envelope.
///
/// Containers appear only when at least one descendant requires a
/// transformation: a list map is padded with identity tags for untouched
/// slots, an object map carries only the keys that need transforming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataMap {
    /// A scalar tag.
    Tag(Tag),
    /// Per-index tags for an array value.
    List(Vec<DataMap>),
    /// Per-field tags for an object value.
    Record(IndexMap<String, DataMap>),
}

impl DataMap {
    /// The identity transformation (`""`).
    pub fn identity() -> Self {
        DataMap::Tag(Tag::Identity)
    }

    /// True when this map performs no transformation at all.
    pub fn is_identity(&self) -> bool {
        matches!(self, DataMap::Tag(Tag::Identity))
    }
}

impl Default for DataMap {
    fn default() -> Self {
        DataMap::identity()
    }
}

impl From<Tag> for DataMap {
    fn from(tag: Tag) -> Self {
        DataMap::Tag(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_tags_serialize_as_short_strings() {
        assert_eq!(serde_json::to_string(&Tag::Identity).unwrap(), r#""""#);
        assert_eq!(serde_json::to_string(&Tag::Bytes).unwrap(), r#""u8""#);
        assert_eq!(serde_json::to_string(&Tag::Map).unwrap(), r#""M""#);
    }

    #[test]
    fn container_maps_round_trip() {
        let map = DataMap::List(vec![
            DataMap::identity(),
            DataMap::Tag(Tag::Date),
            DataMap::Record(
                [("when".to_string(), DataMap::Tag(Tag::Date))]
                    .into_iter()
                    .collect(),
            ),
        ]);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"["","d",{"when":"d"}]"#);
        let back: DataMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn identity_is_default() {
        assert!(DataMap::default().is_identity());
        let tag: DataMap = serde_json::from_str(r#""""#).unwrap();
        assert!(tag.is_identity());
    }
}
