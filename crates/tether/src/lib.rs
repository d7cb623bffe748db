//! tether: bridge live object graphs across workers, processes and sockets.
//!
//! One side (the *server*) exposes objects with methods, properties and
//! events; the other side (the *client*) sees a faithful proxy graph on
//! which method calls return futures, property reads are synchronous, and
//! property mutations and events are mirrored automatically. The two sides
//! are symmetric: either peer may offer objects.
//!
//! The transport is yours: hand outgoing messages to the wire from
//! [`BridgeOptions::send_message`] and feed incoming ones to
//! [`Bridge::handle_message`].
//!
//! # Example
//!
//! ```
//! use tether::{make_local_bridge, update, Data, DynObject, LocalBridgeOptions};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tether::Result<()> {
//! let counter = DynObject::builder()
//!     .prop("count", 0i64)
//!     .method("increment", |obj, _args| {
//!         Box::pin(async move {
//!             let next = obj.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
//!             obj.set("count", next);
//!             update(&obj);
//!             Ok(Data::Int(next))
//!         })
//!     })
//!     .build();
//!
//! let (proxy, _pair) = make_local_bridge(&counter, LocalBridgeOptions::default()).await?;
//! assert_eq!(proxy.call("increment", Vec::new()).await?, Data::Int(1));
//! # Ok(())
//! # }
//! ```

pub use tether_protocol::{
    CallId, CallRecord, ChangeRecord, CreateRecord, DataMap, EventRecord, LocalId, Message,
    PackedData, PackedId, ReturnRecord, Tag,
};

pub use tether_runtime::{
    add_listener, add_watcher, bridgify, close, emit, make_local_bridge, share_data, update,
    update_prop, AsObj, Bridge, BridgeOptions, Bridgeable, CallFuture, CloneFn, Data, DynObject,
    DynObjectBuilder, Error, ErrorBase, ErrorData, LocalBridgeOptions, LocalBridgePair, Magic,
    MethodFuture, Obj, Proxy, Result, Subscription, ON_HOOK, WATCH_HOOK,
};
