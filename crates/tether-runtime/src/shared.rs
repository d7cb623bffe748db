//! The process-wide shared constant table.
//!
//! Functions cannot be marshaled, so values that must keep their identity
//! across the bridge (subscription hooks, well-known constants) are
//! registered here by name and travel as that name (`'s'` envelopes). The
//! table is append-only after initialization; registering a different value
//! under a taken name is a configuration error.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::data::Data;
use crate::error::{Error, Result};

/// Share id of the event-subscription hook constant.
pub const ON_HOOK: &str = "tether.on";

/// Share id of the property-watch hook constant.
pub const WATCH_HOOK: &str = "tether.watch";

static TABLE: OnceLock<Mutex<HashMap<String, Data>>> = OnceLock::new();

fn table() -> &'static Mutex<HashMap<String, Data>> {
    TABLE.get_or_init(|| {
        let mut seed = HashMap::new();
        seed.insert(ON_HOOK.to_string(), Data::Shared(ON_HOOK.to_string()));
        seed.insert(WATCH_HOOK.to_string(), Data::Shared(WATCH_HOOK.to_string()));
        Mutex::new(seed)
    })
}

/// Registers values under globally unique names `"<namespace>.<key>"`
/// (or bare `"<key>"` without a namespace).
///
/// Re-registering an identical value is a no-op; a different value under a
/// taken name fails with [`Error::DuplicateShareId`].
pub fn share_data<K, V, I>(entries: I, namespace: Option<&str>) -> Result<()>
where
    K: AsRef<str>,
    V: Into<Data>,
    I: IntoIterator<Item = (K, V)>,
{
    let mut table = table().lock();
    for (key, value) in entries {
        let share_id = match namespace {
            Some(ns) => format!("{ns}.{}", key.as_ref()),
            None => key.as_ref().to_string(),
        };
        let value = value.into();
        match table.get(&share_id) {
            Some(existing) if *existing == value => {}
            Some(_) => return Err(Error::DuplicateShareId(share_id)),
            None => {
                table.insert(share_id, value);
            }
        }
    }
    Ok(())
}

/// Resolves a share id back to its registered value.
pub fn lookup(share_id: &str) -> Option<Data> {
    table().lock().get(share_id).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hook_constants_are_preregistered() {
        assert_eq!(lookup(ON_HOOK), Some(Data::Shared(ON_HOOK.to_string())));
        assert_eq!(
            lookup(WATCH_HOOK),
            Some(Data::Shared(WATCH_HOOK.to_string()))
        );
    }

    #[test]
    fn share_data_is_idempotent_for_identical_values() {
        share_data([("answer", Data::Int(42))], Some("shared-test")).unwrap();
        share_data([("answer", Data::Int(42))], Some("shared-test")).unwrap();
        assert_eq!(lookup("shared-test.answer"), Some(Data::Int(42)));
    }

    #[test]
    fn conflicting_registration_fails() {
        share_data([("value", Data::Int(1))], Some("shared-conflict")).unwrap();
        let err = share_data([("value", Data::Int(2))], Some("shared-conflict")).unwrap_err();
        assert!(matches!(err, Error::DuplicateShareId(id) if id == "shared-conflict.value"));
    }

    #[test]
    fn unknown_ids_resolve_to_none() {
        assert_eq!(lookup("no.such.id"), None);
    }
}
