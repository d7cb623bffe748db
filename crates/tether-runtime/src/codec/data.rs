//! The data codec: structural classification and value transformation.
//!
//! Packing runs in two phases. `map_data` classifies a value into the
//! [`DataMap`] tag tree, collapsing to the identity wherever the raw JSON
//! form is already faithful. `pack_item` then walks the value against its
//! map producing the JSON `raw` tree. Unpacking inverts the map, validating
//! the shape at every step and reporting failures with a path into the
//! value.

use std::sync::Arc;

use serde_json::Value;

use tether_protocol::packed::{decode_binary, encode_binary};
use tether_protocol::{DataMap, PackedData, PackedError, Tag};

use crate::bridge::Bridge;
use crate::data::{Data, ErrorBase, ErrorData};
use crate::error::{Error, Result};
use crate::shared;

/// Classifies a value. The result is the identity exactly when the raw
/// JSON rendition of the whole subtree is faithful.
pub(crate) fn map_data(value: &Data) -> DataMap {
    match value {
        Data::Null | Data::Bool(_) | Data::Int(_) | Data::String(_) => DataMap::identity(),
        Data::Float(n) => {
            if n.is_finite() {
                DataMap::identity()
            } else {
                Tag::NonFinite.into()
            }
        }
        Data::Undefined => Tag::Undefined.into(),
        Data::Date(_) => Tag::Date.into(),
        Data::Bytes(_) => Tag::Bytes.into(),
        Data::Buffer(_) => Tag::Buffer.into(),
        Data::Error(_) => Tag::Error.into(),
        Data::Object(_) => Tag::Object.into(),
        Data::Shared(_) => Tag::Shared.into(),
        Data::Map(_) => Tag::Map.into(),
        Data::Set(_) => Tag::Set.into(),
        Data::List(items) => {
            let maps: Vec<DataMap> = items.iter().map(map_data).collect();
            if maps.iter().all(DataMap::is_identity) {
                DataMap::identity()
            } else {
                DataMap::List(maps)
            }
        }
        Data::Record(fields) => {
            let mut maps = indexmap::IndexMap::new();
            for (name, child) in fields {
                let map = map_data(child);
                if !map.is_identity() {
                    maps.insert(name.clone(), map);
                }
            }
            if maps.is_empty() {
                DataMap::identity()
            } else {
                DataMap::Record(maps)
            }
        }
    }
}

/// Renders a value whose map is the identity.
fn raw_identity(value: &Data) -> Result<Value> {
    match value {
        Data::Null => Ok(Value::Null),
        Data::Bool(b) => Ok(Value::Bool(*b)),
        Data::Int(n) => Ok(Value::from(*n)),
        Data::Float(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .ok_or(Error::Mismatch {
                expected: "finite number",
                path: "pack".to_string(),
            }),
        Data::String(s) => Ok(Value::String(s.clone())),
        Data::List(items) => items
            .iter()
            .map(raw_identity)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Data::Record(fields) => {
            let mut out = serde_json::Map::with_capacity(fields.len());
            for (name, child) in fields {
                out.insert(name.clone(), raw_identity(child)?);
            }
            Ok(Value::Object(out))
        }
        _ => Err(Error::Mismatch {
            expected: "identity-mapped value",
            path: "pack".to_string(),
        }),
    }
}

/// Walks a value against its map, producing the raw JSON tree.
fn pack_item(bridge: &Arc<Bridge>, value: &Data, map: &DataMap) -> Result<Value> {
    match (map, value) {
        (DataMap::Tag(Tag::Identity), v) => raw_identity(v),
        (DataMap::Tag(Tag::Undefined), Data::Undefined) => Ok(Value::Null),
        (DataMap::Tag(Tag::NonFinite), Data::Float(n)) => {
            let text = if n.is_nan() {
                "NaN"
            } else if n.is_sign_positive() {
                "Infinity"
            } else {
                "-Infinity"
            };
            Ok(Value::String(text.to_string()))
        }
        (DataMap::Tag(Tag::Date), Data::Date(when)) => Ok(Value::String(
            when.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        )),
        (DataMap::Tag(Tag::Error), Data::Error(err)) => {
            let mut fields = indexmap::IndexMap::new();
            fields.insert("message".to_string(), Data::String(err.message.clone()));
            if let Some(stack) = &err.stack {
                fields.insert("stack".to_string(), Data::String(stack.clone()));
            }
            for (name, prop) in &err.props {
                fields.insert(name.clone(), prop.clone());
            }
            let packed = PackedError {
                base: err.base.map(|b| b.as_str().to_string()),
                data: pack_data(bridge, &Data::Record(fields)),
            };
            Ok(serde_json::to_value(packed)?)
        }
        (DataMap::Tag(Tag::Object), Data::Object(obj)) => match bridge.get_packed_id(obj) {
            Some(id) => Ok(Value::from(id)),
            None => Ok(Value::Null),
        },
        (DataMap::Tag(Tag::Shared), Data::Shared(id)) => Ok(Value::String(id.clone())),
        (DataMap::Tag(Tag::Bytes), Data::Bytes(bytes))
        | (DataMap::Tag(Tag::Buffer), Data::Buffer(bytes)) => {
            Ok(Value::String(encode_binary(bytes)))
        }
        (DataMap::Tag(Tag::Map), Data::Map(entries)) => {
            let pairs: Vec<Data> = entries
                .iter()
                .map(|(k, v)| Data::List(vec![k.clone(), v.clone()]))
                .collect();
            Ok(serde_json::to_value(pack_data(bridge, &Data::List(pairs)))?)
        }
        (DataMap::Tag(Tag::Set), Data::Set(members)) => Ok(serde_json::to_value(pack_data(
            bridge,
            &Data::List(members.clone()),
        ))?),
        (DataMap::List(maps), Data::List(items)) => {
            let identity = DataMap::identity();
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let child_map = maps.get(index).unwrap_or(&identity);
                out.push(pack_item(bridge, item, child_map)?);
            }
            Ok(Value::Array(out))
        }
        (DataMap::Record(field_maps), Data::Record(fields)) => {
            let identity = DataMap::identity();
            let mut out = serde_json::Map::with_capacity(fields.len());
            for (name, child) in fields {
                let child_map = field_maps.get(name).unwrap_or(&identity);
                out.insert(name.clone(), pack_item(bridge, child, child_map)?);
            }
            Ok(Value::Object(out))
        }
        _ => Err(Error::Mismatch {
            expected: "value matching its data map",
            path: "pack".to_string(),
        }),
    }
}

/// Packs a value for the wire. A failure during packing becomes the
/// rejection payload itself (`throw: true`), so the far side observes the
/// pack error instead of a torn message.
pub fn pack_data(bridge: &Arc<Bridge>, value: &Data) -> PackedData {
    let map = map_data(value);
    match pack_item(bridge, value, &map) {
        Ok(raw) => PackedData {
            map,
            raw,
            throw: false,
        },
        Err(err) => {
            tracing::debug!(error = %err, "packing failed, sending as rejection");
            pack_throw(bridge, &Data::error(ErrorData::from(err)))
        }
    }
}

/// Packs a value unconditionally marked as thrown.
pub fn pack_throw(bridge: &Arc<Bridge>, value: &Data) -> PackedData {
    let mut env = pack_data(bridge, value);
    env.throw = true;
    env
}

/// Inverts an envelope without honoring its `throw` flag.
pub(crate) fn unpack_raw(bridge: &Arc<Bridge>, env: &PackedData, path: &str) -> Result<Data> {
    unpack_item(bridge, &env.map, &env.raw, path)
}

/// Inverts an envelope. When the envelope is marked thrown, the unpacked
/// value is raised as a remote rejection instead of returned.
pub fn unpack_data(bridge: &Arc<Bridge>, env: &PackedData, path: &str) -> Result<Data> {
    let value = unpack_raw(bridge, env, path)?;
    if env.throw {
        Err(thrown_error(value))
    } else {
        Ok(value)
    }
}

/// Adapts an unpacked thrown value into an [`Error::Remote`].
pub(crate) fn thrown_error(value: Data) -> Error {
    let data = match value {
        Data::Error(err) => (*err).clone(),
        Data::String(message) => ErrorData::new(message),
        other => ErrorData::new(format!("{other:?}")),
    };
    Error::Remote(data)
}

fn unpack_item(bridge: &Arc<Bridge>, map: &DataMap, raw: &Value, path: &str) -> Result<Data> {
    match map {
        DataMap::Tag(Tag::Identity) => from_raw(raw, path),
        DataMap::Tag(Tag::Unsupported) => Err(Error::Unsupported {
            path: path.to_string(),
        }),
        DataMap::Tag(Tag::Undefined) => Ok(Data::Undefined),
        DataMap::Tag(Tag::NonFinite) => match raw.as_str() {
            Some("NaN") => Ok(Data::Float(f64::NAN)),
            Some("Infinity") => Ok(Data::Float(f64::INFINITY)),
            Some("-Infinity") => Ok(Data::Float(f64::NEG_INFINITY)),
            _ => Err(mismatch("non-finite float marker", path)),
        },
        DataMap::Tag(Tag::Date) => {
            let text = raw.as_str().ok_or_else(|| mismatch("date string", path))?;
            chrono::DateTime::parse_from_rfc3339(text)
                .map(|when| Data::Date(when.with_timezone(&chrono::Utc)))
                .map_err(|_| mismatch("ISO 8601 date", path))
        }
        DataMap::Tag(Tag::Error) => {
            let packed: PackedError = serde_json::from_value(raw.clone())
                .map_err(|_| mismatch("packed error", path))?;
            let inner = unpack_raw(bridge, &packed.data, &format!("{path}.error"))?;
            let Data::Record(mut fields) = inner else {
                return Err(mismatch("error property record", path));
            };
            let message = match fields.shift_remove("message") {
                Some(Data::String(text)) => text,
                Some(other) => format!("{other:?}"),
                None => String::new(),
            };
            let stack = match fields.shift_remove("stack") {
                Some(Data::String(text)) => Some(text),
                _ => None,
            };
            Ok(Data::error(ErrorData {
                base: packed.base.as_deref().and_then(ErrorBase::from_name),
                message,
                stack,
                props: fields,
            }))
        }
        DataMap::Tag(Tag::Object) => {
            if raw.is_null() {
                return Err(Error::ClosedObject {
                    path: path.to_string(),
                });
            }
            let id = raw.as_i64().ok_or_else(|| mismatch("packed id", path))?;
            bridge
                .get_object(id)
                .map(Data::Object)
                .ok_or_else(|| Error::InvalidPackedId {
                    id,
                    path: path.to_string(),
                })
        }
        DataMap::Tag(Tag::Shared) => {
            let id = raw.as_str().ok_or_else(|| mismatch("share id", path))?;
            shared::lookup(id).ok_or_else(|| Error::InvalidShareId(id.to_string()))
        }
        DataMap::Tag(Tag::Bytes) => decode_bytes(raw, path).map(Data::Bytes),
        DataMap::Tag(Tag::Buffer) => decode_bytes(raw, path).map(Data::Buffer),
        DataMap::Tag(Tag::Map) => {
            let items = unpack_nested_list(bridge, raw, path, "packed map entries")?;
            let mut entries = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let Data::List(pair) = item else {
                    return Err(mismatch("map entry pair", &format!("{path}[{index}]")));
                };
                let pair: [Data; 2] = pair
                    .try_into()
                    .map_err(|_| mismatch("map entry pair", &format!("{path}[{index}]")))?;
                let [key, value] = pair;
                entries.push((key, value));
            }
            Ok(Data::Map(entries))
        }
        DataMap::Tag(Tag::Set) => {
            unpack_nested_list(bridge, raw, path, "packed set members").map(Data::Set)
        }
        DataMap::List(maps) => {
            let items = raw.as_array().ok_or_else(|| mismatch("array", path))?;
            let identity = DataMap::identity();
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let child_map = maps.get(index).unwrap_or(&identity);
                out.push(unpack_item(
                    bridge,
                    child_map,
                    item,
                    &format!("{path}[{index}]"),
                )?);
            }
            Ok(Data::List(out))
        }
        DataMap::Record(field_maps) => {
            let fields = raw.as_object().ok_or_else(|| mismatch("object", path))?;
            let identity = DataMap::identity();
            let mut out = indexmap::IndexMap::with_capacity(fields.len());
            for (name, item) in fields {
                let child_map = field_maps.get(name).unwrap_or(&identity);
                out.insert(
                    name.clone(),
                    unpack_item(bridge, child_map, item, &format!("{path}.{name}"))?,
                );
            }
            Ok(Data::Record(out))
        }
    }
}

/// Reconstructs an identity-mapped subtree.
fn from_raw(raw: &Value, path: &str) -> Result<Data> {
    match raw {
        Value::Null => Ok(Data::Null),
        Value::Bool(b) => Ok(Data::Bool(*b)),
        Value::Number(n) => {
            if let Some(int) = n.as_i64() {
                Ok(Data::Int(int))
            } else {
                n.as_f64()
                    .map(Data::Float)
                    .ok_or_else(|| mismatch("number", path))
            }
        }
        Value::String(s) => Ok(Data::String(s.clone())),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(index, item)| from_raw(item, &format!("{path}[{index}]")))
            .collect::<Result<Vec<_>>>()
            .map(Data::List),
        Value::Object(fields) => {
            let mut out = indexmap::IndexMap::with_capacity(fields.len());
            for (name, item) in fields {
                out.insert(name.clone(), from_raw(item, &format!("{path}.{name}"))?);
            }
            Ok(Data::Record(out))
        }
    }
}

fn decode_bytes(raw: &Value, path: &str) -> Result<Vec<u8>> {
    let text = raw.as_str().ok_or_else(|| mismatch("base64 string", path))?;
    decode_binary(text).map_err(|_| mismatch("base64 data", path))
}

/// Unpacks the nested envelope carried by `'M'`/`'S'` payloads into a list.
fn unpack_nested_list(
    bridge: &Arc<Bridge>,
    raw: &Value,
    path: &str,
    expected: &'static str,
) -> Result<Vec<Data>> {
    let env: PackedData =
        serde_json::from_value(raw.clone()).map_err(|_| mismatch(expected, path))?;
    match unpack_raw(bridge, &env, path)? {
        Data::List(items) => Ok(items),
        _ => Err(mismatch(expected, path)),
    }
}

fn mismatch(expected: &'static str, path: &str) -> Error {
    Error::Mismatch {
        expected,
        path: path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Bridge, BridgeOptions};
    use chrono::TimeZone;

    fn quiet_bridge() -> Arc<Bridge> {
        Bridge::new(BridgeOptions::new(|_| {}))
    }

    fn round_trip(bridge: &Arc<Bridge>, value: Data) -> Data {
        let env = pack_data(bridge, &value);
        // Prove the envelope itself survives JSON.
        let json = serde_json::to_value(&env).unwrap();
        let env: PackedData = serde_json::from_value(json).unwrap();
        unpack_data(bridge, &env, "root").unwrap()
    }

    #[tokio::test]
    async fn scalars_round_trip_untouched() {
        let bridge = quiet_bridge();
        for value in [
            Data::Null,
            Data::Bool(true),
            Data::Int(-7),
            Data::Float(2.5),
            Data::String("hi".to_string()),
        ] {
            let env = pack_data(&bridge, &value);
            assert!(env.map.is_identity());
            assert_eq!(round_trip(&bridge, value.clone()), value);
        }
    }

    #[tokio::test]
    async fn undefined_and_non_finite_floats_round_trip() {
        let bridge = quiet_bridge();
        assert_eq!(round_trip(&bridge, Data::Undefined), Data::Undefined);
        assert_eq!(
            round_trip(&bridge, Data::Float(f64::NAN)),
            Data::Float(f64::NAN)
        );
        assert_eq!(
            round_trip(&bridge, Data::Float(f64::NEG_INFINITY)),
            Data::Float(f64::NEG_INFINITY)
        );
    }

    #[tokio::test]
    async fn dates_round_trip_as_iso_strings() {
        let bridge = quiet_bridge();
        let when = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();
        let env = pack_data(&bridge, &Data::Date(when));
        assert_eq!(env.raw, Value::String("2024-03-01T12:30:45.000Z".into()));
        assert_eq!(round_trip(&bridge, Data::Date(when)), Data::Date(when));
    }

    #[tokio::test]
    async fn binary_round_trips_as_base64() {
        let bridge = quiet_bridge();
        let bytes = vec![0u8, 127, 255];
        assert_eq!(
            round_trip(&bridge, Data::Bytes(bytes.clone())),
            Data::Bytes(bytes.clone())
        );
        assert_eq!(
            round_trip(&bridge, Data::Buffer(bytes.clone())),
            Data::Buffer(bytes)
        );
    }

    #[tokio::test]
    async fn containers_collapse_to_identity_when_plain() {
        let bridge = quiet_bridge();
        let value = Data::record([
            ("a", Data::Int(1)),
            ("b", Data::List(vec![Data::Int(2), Data::String("x".into())])),
        ]);
        let env = pack_data(&bridge, &value);
        assert!(env.map.is_identity());
        assert_eq!(round_trip(&bridge, value.clone()), value);
    }

    #[tokio::test]
    async fn mixed_lists_pad_untouched_slots() {
        let bridge = quiet_bridge();
        let value = Data::List(vec![Data::Int(1), Data::Undefined, Data::Int(3)]);
        let env = pack_data(&bridge, &value);
        assert_eq!(
            env.map,
            DataMap::List(vec![
                DataMap::identity(),
                Tag::Undefined.into(),
                DataMap::identity(),
            ])
        );
        assert_eq!(round_trip(&bridge, value.clone()), value);
    }

    #[tokio::test]
    async fn record_maps_carry_only_transformed_fields() {
        let bridge = quiet_bridge();
        let value = Data::record([("plain", Data::Int(1)), ("missing", Data::Undefined)]);
        let env = pack_data(&bridge, &value);
        match &env.map {
            DataMap::Record(maps) => {
                assert_eq!(maps.len(), 1);
                assert_eq!(maps.get("missing"), Some(&Tag::Undefined.into()));
            }
            other => panic!("expected record map, got {other:?}"),
        }
        assert_eq!(round_trip(&bridge, value.clone()), value);
    }

    #[tokio::test]
    async fn maps_and_sets_round_trip() {
        let bridge = quiet_bridge();
        let map = Data::Map(vec![
            (Data::String("k".into()), Data::Undefined),
            (Data::Int(1), Data::List(vec![Data::Int(2)])),
        ]);
        assert_eq!(round_trip(&bridge, map.clone()), map);
        let set = Data::Set(vec![Data::Int(1), Data::String("two".into())]);
        assert_eq!(round_trip(&bridge, set.clone()), set);
    }

    #[tokio::test]
    async fn errors_round_trip_with_class_stack_and_props() {
        let bridge = quiet_bridge();
        let err = ErrorData::type_error("nope")
            .with_stack("TypeError: nope\n  at increment")
            .with_prop("code", Data::Int(42));
        let value = Data::error(err);
        let back = round_trip(&bridge, value.clone());
        assert_eq!(back, value);
        let unpacked = back.as_error().unwrap();
        assert_eq!(unpacked.base, Some(ErrorBase::Type));
        assert_eq!(unpacked.message, "nope");
        assert_eq!(
            unpacked.stack.as_deref(),
            Some("TypeError: nope\n  at increment")
        );
        assert_eq!(unpacked.props.get("code"), Some(&Data::Int(42)));
    }

    #[tokio::test]
    async fn unknown_error_base_falls_back_to_generic() {
        let bridge = quiet_bridge();
        let raw = serde_json::json!({
            "base": "CustomError",
            "raw": {"message": "odd"}
        });
        let env = PackedData {
            map: Tag::Error.into(),
            raw,
            throw: false,
        };
        let value = unpack_data(&bridge, &env, "root").unwrap();
        let err = value.as_error().unwrap();
        assert_eq!(err.base, None);
        assert_eq!(err.message, "odd");
    }

    #[tokio::test]
    async fn shared_constants_travel_by_name() {
        let bridge = quiet_bridge();
        shared::share_data([("limit", Data::Int(16))], Some("codec-test")).unwrap();
        let value = Data::Shared("codec-test.limit".to_string());
        let env = pack_data(&bridge, &value);
        assert_eq!(env.raw, Value::String("codec-test.limit".into()));
        // A shared reference unpacks to the registered value.
        assert_eq!(
            unpack_data(&bridge, &env, "root").unwrap(),
            Data::Int(16)
        );
    }

    #[tokio::test]
    async fn unknown_share_id_is_a_range_error() {
        let bridge = quiet_bridge();
        let env = PackedData {
            map: Tag::Shared.into(),
            raw: Value::String("nowhere.nothing".into()),
            throw: false,
        };
        let err = unpack_data(&bridge, &env, "root").unwrap_err();
        assert!(matches!(err, Error::InvalidShareId(_)));
    }

    #[tokio::test]
    async fn closed_object_reference_reports_its_path() {
        let bridge = quiet_bridge();
        let env = PackedData {
            map: DataMap::Record(
                [("child".to_string(), Tag::Object.into())]
                    .into_iter()
                    .collect(),
            ),
            raw: serde_json::json!({"child": null}),
            throw: false,
        };
        let err = unpack_data(&bridge, &env, "root").unwrap_err();
        assert_eq!(err.to_string(), "Closed bridge object at root.child");
    }

    #[tokio::test]
    async fn unsupported_tag_always_fails_to_unpack() {
        let bridge = quiet_bridge();
        let env = PackedData {
            map: Tag::Unsupported.into(),
            raw: Value::String("function".into()),
            throw: false,
        };
        let err = unpack_data(&bridge, &env, "root").unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[tokio::test]
    async fn throw_envelopes_raise_their_payload() {
        let bridge = quiet_bridge();
        let env = pack_throw(&bridge, &Data::error(ErrorData::type_error("broken")));
        let err = unpack_data(&bridge, &env, "root").unwrap_err();
        match err {
            Error::Remote(data) => {
                assert_eq!(data.base, Some(ErrorBase::Type));
                assert_eq!(data.message, "broken");
            }
            other => panic!("expected remote rejection, got {other}"),
        }
    }
}
