//! The batched wire message and its record types.
//!
//! One flush produces one [`Message`] carrying everything that happened
//! since the previous flush. Sections are interpreted in declaration order:
//! `created` entries always precede any `changed`/`events`/`returns` that
//! reference their ids within the same message. Empty sections are omitted
//! from the wire, and an entirely empty message is never sent.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::packed::PackedData;
use crate::{CallId, LocalId};

/// Announces a newly admitted object: its id, method and subscription-hook
/// names, and the packed snapshot of its initial property values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecord {
    pub local_id: LocalId,
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on: Vec<String>,
    pub props: IndexMap<String, PackedData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
}

/// Carries the re-packed values of properties that diffed as changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub local_id: LocalId,
    pub props: IndexMap<String, PackedData>,
}

/// A method invocation on an object the receiver owns.
///
/// The flattened envelope packs the argument list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub call_id: CallId,
    pub remote_id: LocalId,
    pub name: String,
    #[serde(flatten)]
    pub payload: PackedData,
}

/// A named event. `local_id == 0` addresses the bridge root itself (used
/// for the root handshake).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub local_id: LocalId,
    pub name: String,
    #[serde(flatten)]
    pub payload: PackedData,
}

/// The settlement of a previously sent call. `throw: true` in the flattened
/// envelope means rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnRecord {
    pub call_id: CallId,
    #[serde(flatten)]
    pub payload: PackedData,
}

/// One coalesced batch of bridge traffic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created: Vec<CreateRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<ChangeRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<CallRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub returns: Vec<ReturnRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub closed: Vec<LocalId>,
}

impl Message {
    /// True when no section carries anything; empty messages are never
    /// handed to the transport.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.changed.is_empty()
            && self.events.is_empty()
            && self.calls.is_empty()
            && self.returns.is_empty()
            && self.closed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_message_serializes_to_empty_object() {
        let msg = Message::default();
        assert!(msg.is_empty());
        assert_eq!(serde_json::to_string(&msg).unwrap(), "{}");
    }

    #[test]
    fn call_record_flattens_payload() {
        let msg = Message {
            calls: vec![CallRecord {
                call_id: 7,
                remote_id: 3,
                name: "increment".to_string(),
                payload: PackedData::raw(json!([1])),
            }],
            ..Default::default()
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"calls": [{"callId": 7, "remoteId": 3, "name": "increment", "raw": [1]}]})
        );
        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn create_record_round_trips_through_json() {
        let msg = Message {
            created: vec![CreateRecord {
                local_id: 1,
                methods: vec!["increment".to_string()],
                on: vec!["on".to_string(), "watch".to_string()],
                props: [("count".to_string(), PackedData::raw(json!(0)))]
                    .into_iter()
                    .collect(),
                base: None,
            }],
            closed: vec![9],
            ..Default::default()
        };
        let text = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
        assert!(!back.is_empty());
    }

    #[test]
    fn missing_sections_deserialize_as_empty() {
        let msg: Message = serde_json::from_str(r#"{"closed":[4]}"#).unwrap();
        assert_eq!(msg.closed, vec![4]);
        assert!(msg.created.is_empty());
        assert!(msg.returns.is_empty());
    }
}
