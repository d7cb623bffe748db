//! The trait bridgeable objects implement, and a dynamic implementation.
//!
//! Implementing [`Bridgeable`] is what marks a type as bridgeable: the
//! trait exposes the embedded [`Magic`] record plus the reflection surface
//! the object codec introspects (property names and getters, method names
//! and an async invoker, subscription hooks). Fabricated proxies implement
//! the same trait, which is what lets a remote reference be passed back to
//! its owner as a negative packed id.
//!
//! [`DynObject`] is the batteries-included implementation: a property bag
//! of [`Data`] values with registered async method closures.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use downcast_rs::{impl_downcast, DowncastSync};
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::data::{Data, ErrorData};
use crate::magic::Magic;

/// A shared handle to any bridgeable object.
pub type Obj = Arc<dyn Bridgeable>;

/// The future returned by a bridgeable method. Rejections are [`ErrorData`]
/// so they can cross the bridge with full fidelity.
pub type MethodFuture =
    Pin<Box<dyn Future<Output = std::result::Result<Data, ErrorData>> + Send + 'static>>;

/// An object whose properties, methods and events may be proxied across a
/// bridge.
///
/// Names beginning with `_` and the name `constructor` never cross the
/// wire; the object codec filters them even if an implementation lists
/// them.
pub trait Bridgeable: DowncastSync {
    /// The hidden metadata record. Implementations embed a [`Magic`] and
    /// return it here.
    fn magic(&self) -> &Magic;

    /// Names of the value properties this object exposes.
    fn property_names(&self) -> Vec<String>;

    /// Reads one property. An `Err` models a throwing getter: it is packed
    /// with `throw: true` and re-thrown from the proxy's getter.
    fn property(&self, name: &str) -> std::result::Result<Data, ErrorData>;

    /// Names of the callable methods this object exposes.
    fn method_names(&self) -> Vec<String>;

    /// Invokes a method. Unknown names must reject with a
    /// "'{name}' is not a function" type error.
    fn call(self: Arc<Self>, name: String, args: Vec<Data>) -> MethodFuture;

    /// Names announced under `on` in the create record; the proxy installs
    /// the process-wide subscription constants under these names.
    fn hook_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Optional shared base-class name carried in the create record.
    fn base_name(&self) -> Option<String> {
        None
    }
}

impl_downcast!(sync Bridgeable);

/// A ready [`MethodFuture`] rejecting with a "not a function" type error.
pub(crate) fn no_such_method(name: &str) -> MethodFuture {
    let err = ErrorData::type_error(format!("'{name}' is not a function"));
    Box::pin(std::future::ready(Err(err)))
}

type DynMethod = Arc<dyn Fn(Arc<DynObject>, Vec<Data>) -> MethodFuture + Send + Sync>;

/// A dynamic bridgeable object: named [`Data`] properties plus registered
/// async methods.
///
/// ```
/// use tether_runtime::object::DynObject;
/// use tether_runtime::data::Data;
///
/// let counter = DynObject::builder()
///     .prop("count", 0i64)
///     .method("increment", |obj, args| {
///         Box::pin(async move {
///             let step = args.first().and_then(Data::as_i64).unwrap_or(1);
///             let next = obj.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + step;
///             obj.set("count", next);
///             tether_runtime::api::update(&obj);
///             Ok(Data::Int(next))
///         })
///     })
///     .build();
/// assert_eq!(counter.get("count"), Some(Data::Int(0)));
/// ```
pub struct DynObject {
    magic: Magic,
    base: Option<String>,
    props: Mutex<IndexMap<String, Data>>,
    methods: IndexMap<String, DynMethod>,
}

impl DynObject {
    pub fn builder() -> DynObjectBuilder {
        DynObjectBuilder {
            base: None,
            props: IndexMap::new(),
            methods: IndexMap::new(),
        }
    }

    /// Reads a property value.
    pub fn get(&self, name: &str) -> Option<Data> {
        self.props.lock().get(name).cloned()
    }

    /// Stores a property value. The change reaches remote peers only after
    /// [`update`](crate::api::update) marks the object dirty.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Data>) {
        self.props.lock().insert(name.into(), value.into());
    }
}

impl Bridgeable for DynObject {
    fn magic(&self) -> &Magic {
        &self.magic
    }

    fn property_names(&self) -> Vec<String> {
        self.props.lock().keys().cloned().collect()
    }

    fn property(&self, name: &str) -> std::result::Result<Data, ErrorData> {
        self.get(name)
            .ok_or_else(|| ErrorData::type_error(format!("No such property '{name}'")))
    }

    fn method_names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    fn call(self: Arc<Self>, name: String, args: Vec<Data>) -> MethodFuture {
        match self.methods.get(&name) {
            Some(method) => {
                let method = Arc::clone(method);
                method.as_ref()(self, args)
            }
            None => no_such_method(&name),
        }
    }

    fn hook_names(&self) -> Vec<String> {
        vec!["on".to_string(), "watch".to_string()]
    }

    fn base_name(&self) -> Option<String> {
        self.base.clone()
    }
}

/// Builder for [`DynObject`].
pub struct DynObjectBuilder {
    base: Option<String>,
    props: IndexMap<String, Data>,
    methods: IndexMap<String, DynMethod>,
}

impl DynObjectBuilder {
    /// Declares an initial property value.
    pub fn prop(mut self, name: impl Into<String>, value: impl Into<Data>) -> Self {
        self.props.insert(name.into(), value.into());
        self
    }

    /// Registers an async method. The closure receives the object handle
    /// and the unpacked argument list.
    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<DynObject>, Vec<Data>) -> MethodFuture + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(f));
        self
    }

    /// Sets the shared base-class name carried in create records.
    pub fn base(mut self, name: impl Into<String>) -> Self {
        self.base = Some(name.into());
        self
    }

    pub fn build(self) -> Arc<DynObject> {
        Arc::new(DynObject {
            magic: Magic::new(),
            base: self.base,
            props: Mutex::new(self.props),
            methods: self.methods,
        })
    }
}

/// Assigns the object's local id eagerly. Idempotent; implementing
/// [`Bridgeable`] already makes an object bridgeable, this only forces id
/// assignment up front.
pub fn bridgify(obj: &impl AsObj) -> tether_protocol::LocalId {
    obj.as_obj().magic().local_id()
}

/// Anything that can be viewed as a shared [`Obj`] handle: `Arc<T>` for a
/// concrete bridgeable `T`, or an [`Obj`] itself.
pub trait AsObj {
    fn as_obj(&self) -> Obj;
}

impl<T: Bridgeable> AsObj for Arc<T> {
    fn as_obj(&self) -> Obj {
        self.clone()
    }
}

impl AsObj for Arc<dyn Bridgeable> {
    fn as_obj(&self) -> Obj {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Arc<DynObject> {
        DynObject::builder()
            .prop("count", 0i64)
            .prop("_secret", "hidden")
            .method("add", |obj, args| {
                Box::pin(async move {
                    let step = args.first().and_then(Data::as_i64).unwrap_or(0);
                    let next = obj.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + step;
                    obj.set("count", next);
                    Ok(Data::Int(next))
                })
            })
            .build()
    }

    #[tokio::test]
    async fn methods_receive_the_object_handle() {
        let obj = sample();
        let result = obj.clone().call("add".to_string(), vec![Data::Int(5)]).await;
        assert_eq!(result.unwrap(), Data::Int(5));
        assert_eq!(obj.get("count"), Some(Data::Int(5)));
    }

    #[tokio::test]
    async fn unknown_method_rejects_with_type_error() {
        let obj = sample();
        let err = obj
            .clone()
            .call("missing".to_string(), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "TypeError: 'missing' is not a function");
    }

    #[test]
    fn dyn_objects_announce_subscription_hooks() {
        let obj = sample();
        assert_eq!(obj.hook_names(), vec!["on", "watch"]);
        assert_eq!(obj.method_names(), vec!["add"]);
    }

    #[test]
    fn bridgify_is_idempotent() {
        let obj = sample();
        let id = bridgify(&obj);
        assert_eq!(bridgify(&obj), id);
    }
}
