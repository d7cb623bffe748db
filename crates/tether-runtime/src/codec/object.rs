//! The object codec: snapshotting, diffing and proxy fabrication.

use std::sync::Arc;

use indexmap::IndexMap;

use tether_protocol::{CreateRecord, PackedData};

use crate::bridge::Bridge;
use crate::codec::data::{pack_data, pack_throw, thrown_error, unpack_raw};
use crate::data::{Data, ErrorData};
use crate::magic::Magic;
use crate::object::Obj;
use crate::proxy::Proxy;

/// Per-property memory of the last value a bridge packed for an object.
pub type ValueCache = IndexMap<String, CacheSlot>;

/// One cache slot. `Dirty` never compares equal, forcing a re-pack on the
/// next diff regardless of the current value.
#[derive(Debug, Clone)]
pub enum CacheSlot {
    Seen(Data),
    Dirty,
}

/// Names that never cross the wire.
fn filtered(name: &str) -> bool {
    name.starts_with('_') || name == "constructor"
}

/// Snapshots a bridgeable object into its create record, packing every
/// property value eagerly and seeding the diff cache.
///
/// A getter failure becomes a `throw: true` entry whose cache slot is left
/// dirty, so the next diff retries the read.
pub fn pack_object(bridge: &Arc<Bridge>, obj: &Obj) -> (ValueCache, CreateRecord) {
    let local_id = obj.magic().local_id();
    let hooks = obj.hook_names();
    let mut cache = ValueCache::new();
    let mut props = IndexMap::new();

    for name in obj.property_names() {
        if filtered(&name) || hooks.contains(&name) {
            continue;
        }
        match obj.property(&name) {
            Ok(value) => {
                props.insert(name.clone(), pack_data(bridge, &value));
                cache.insert(name, CacheSlot::Seen(value));
            }
            Err(err) => {
                props.insert(name.clone(), pack_throw(bridge, &Data::error(err)));
                cache.insert(name, CacheSlot::Dirty);
            }
        }
    }

    let methods = obj
        .method_names()
        .into_iter()
        .filter(|name| !filtered(name))
        .collect();

    let create = CreateRecord {
        local_id,
        methods,
        on: hooks,
        props,
        base: obj.base_name(),
    };
    (cache, create)
}

/// Re-reads every cached property and re-packs the ones that moved,
/// advancing the cache as it goes. Returns the changed properties, empty
/// when nothing moved.
pub fn diff_object(
    bridge: &Arc<Bridge>,
    obj: &Obj,
    cache: &mut ValueCache,
) -> IndexMap<String, PackedData> {
    let mut changed = IndexMap::new();

    for (name, slot) in cache.iter_mut() {
        let current = obj.property(name);
        let unchanged = matches!(
            (&*slot, &current),
            (CacheSlot::Seen(prev), Ok(cur)) if prev == cur
        );
        if unchanged {
            continue;
        }
        match current {
            Ok(value) => {
                changed.insert(name.clone(), pack_data(bridge, &value));
                *slot = CacheSlot::Seen(value);
            }
            Err(err) => {
                changed.insert(name.clone(), pack_throw(bridge, &Data::error(err)));
                *slot = CacheSlot::Dirty;
            }
        }
    }

    changed
}

/// Fabricates the proxy for a create record. Property values are installed
/// separately by [`update_object_props`], after every proxy named in the
/// same message exists.
pub fn make_proxy(bridge: &Arc<Bridge>, create: &CreateRecord, hidden: Vec<String>) -> Arc<Proxy> {
    tracing::debug!(local_id = create.local_id, methods = ?create.methods, "fabricating proxy");
    Proxy::new(bridge, create, hidden)
}

/// Unpacks a property batch into a proxy's cache. Unpack failures (and
/// `throw` entries) are stored as the property's error, to be re-thrown
/// from the getter; watchers are the bridge flush's business, not ours.
pub fn update_object_props(
    bridge: &Arc<Bridge>,
    magic: &Magic,
    props: &IndexMap<String, PackedData>,
) {
    for (name, env) in props {
        let slot = match unpack_raw(bridge, env, name) {
            Ok(value) if env.throw => Err(ErrorData::from(thrown_error(value))),
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::debug!(prop = %name, error = %err, "property failed to unpack");
                Err(ErrorData::from(err))
            }
        };
        magic.proxy_set(name, slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Bridge, BridgeOptions};
    use crate::data::ErrorBase;
    use crate::magic::Magic;
    use crate::object::{Bridgeable, DynObject, MethodFuture};

    fn quiet_bridge() -> Arc<Bridge> {
        Bridge::new(BridgeOptions::new(|_| {}))
    }

    fn counter() -> Obj {
        DynObject::builder()
            .prop("count", 0i64)
            .prop("_hidden", "nope")
            .method("increment", |obj, _args| {
                Box::pin(async move {
                    let next = obj.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
                    obj.set("count", next);
                    Ok(Data::Int(next))
                })
            })
            .build()
    }

    #[tokio::test]
    async fn snapshot_filters_private_names_and_lists_hooks() {
        let bridge = quiet_bridge();
        let obj = counter();
        let (cache, create) = pack_object(&bridge, &obj);

        assert_eq!(create.methods, vec!["increment"]);
        assert_eq!(create.on, vec!["on", "watch"]);
        assert!(create.props.contains_key("count"));
        assert!(!create.props.contains_key("_hidden"));
        assert!(matches!(cache.get("count"), Some(CacheSlot::Seen(Data::Int(0)))));
    }

    #[tokio::test]
    async fn diff_reports_only_moved_properties() {
        let bridge = quiet_bridge();
        let obj = counter();
        let (mut cache, _) = pack_object(&bridge, &obj);

        assert!(diff_object(&bridge, &obj, &mut cache).is_empty());

        let dyn_obj = obj.clone().downcast_arc::<DynObject>().ok().unwrap();
        dyn_obj.set("count", 3i64);
        let changed = diff_object(&bridge, &obj, &mut cache);
        assert_eq!(changed.len(), 1);
        assert!(changed.contains_key("count"));

        // The cache advanced, so the same value diffs clean.
        assert!(diff_object(&bridge, &obj, &mut cache).is_empty());
    }

    #[tokio::test]
    async fn dirty_slot_forces_a_repack_of_an_unchanged_value() {
        let bridge = quiet_bridge();
        let obj = counter();
        let (mut cache, _) = pack_object(&bridge, &obj);

        cache.insert("count".to_string(), CacheSlot::Dirty);
        let changed = diff_object(&bridge, &obj, &mut cache);
        assert!(changed.contains_key("count"));
    }

    struct Grumpy {
        magic: Magic,
    }

    impl Bridgeable for Grumpy {
        fn magic(&self) -> &Magic {
            &self.magic
        }
        fn property_names(&self) -> Vec<String> {
            vec!["broken".to_string()]
        }
        fn property(&self, _name: &str) -> Result<Data, ErrorData> {
            Err(ErrorData::type_error("getter exploded"))
        }
        fn method_names(&self) -> Vec<String> {
            Vec::new()
        }
        fn call(self: Arc<Self>, name: String, _args: Vec<Data>) -> MethodFuture {
            crate::object::no_such_method(&name)
        }
    }

    #[tokio::test]
    async fn throwing_getter_packs_as_throw_and_stays_dirty() {
        let bridge = quiet_bridge();
        let obj: Obj = Arc::new(Grumpy { magic: Magic::new() });
        let (mut cache, create) = pack_object(&bridge, &obj);

        assert!(create.props.get("broken").unwrap().throw);
        assert!(matches!(cache.get("broken"), Some(CacheSlot::Dirty)));

        // Still failing: every diff re-reports it.
        let changed = diff_object(&bridge, &obj, &mut cache);
        assert!(changed.get("broken").unwrap().throw);
    }

    #[tokio::test]
    async fn update_object_props_stores_values_and_errors() {
        let bridge = quiet_bridge();
        let obj = counter();
        let (_, create) = pack_object(&bridge, &obj);
        let proxy = make_proxy(&bridge, &create, Vec::new());
        update_object_props(&bridge, proxy.magic(), &create.props);

        assert_eq!(proxy.get("count").unwrap(), Data::Int(0));

        let mut props = IndexMap::new();
        props.insert(
            "count".to_string(),
            pack_throw(&bridge, &Data::error(ErrorData::type_error("gone"))),
        );
        update_object_props(&bridge, proxy.magic(), &props);
        let err = proxy.get("count").unwrap_err();
        assert_eq!(err.remote_data().unwrap().base, Some(ErrorBase::Type));
    }

    #[tokio::test]
    async fn proxy_hooks_read_as_shared_constants() {
        let bridge = quiet_bridge();
        let obj = counter();
        let (_, create) = pack_object(&bridge, &obj);
        let proxy = make_proxy(&bridge, &create, Vec::new());

        assert_eq!(
            proxy.get("on").unwrap(),
            Data::Shared(crate::shared::ON_HOOK.to_string())
        );
        assert_eq!(
            proxy.get("watch").unwrap(),
            Data::Shared(crate::shared::WATCH_HOOK.to_string())
        );
    }

    #[tokio::test]
    async fn hidden_names_are_not_enumerated_but_stay_readable() {
        let bridge = quiet_bridge();
        let obj = counter();
        let (_, create) = pack_object(&bridge, &obj);
        let proxy = make_proxy(&bridge, &create, vec!["count".to_string()]);
        update_object_props(&bridge, proxy.magic(), &create.props);

        assert!(!proxy.property_names().contains(&"count".to_string()));
        assert_eq!(proxy.get("count").unwrap(), Data::Int(0));
    }
}
