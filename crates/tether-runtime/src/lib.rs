//! Tether runtime - object registry, codecs and bridge state.
//!
//! This crate is the live half of the tether object bridge. It bridges a
//! graph of bridgeable objects across any byte-oriented message channel:
//! the transport is whatever the caller wires into
//! [`BridgeOptions::send_message`] and [`Bridge::handle_message`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   user code  │  Bridgeable impls, verbs (emit/update/close)
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │    bridge    │  registries, outbox, throttled flush, dispatch
//! │  ┌─────────┐ │
//! │  │  codec  │ │  data + object pack/unpack
//! │  └─────────┘ │
//! │  ┌─────────┐ │
//! │  │  magic  │ │  per-object hidden metadata
//! │  └─────────┘ │
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │  transport   │  supplied by the caller (worker, process, socket)
//! └──────────────┘
//! ```
//!
//! Everything is single-logical-threaded and cooperative: entry points run
//! on whatever execution context drove them, and the only deferred work is
//! the zero-or-throttle-delay flush task.

pub mod api;
pub mod bridge;
pub mod codec;
pub mod data;
pub mod error;
pub mod local;
pub mod magic;
pub mod object;
pub mod proxy;
pub mod shared;

// Re-export key types at crate root
pub use api::{add_listener, add_watcher, close, emit, update, update_prop, Subscription};
pub use bridge::{Bridge, BridgeOptions, CallFuture, SendFn};
pub use data::{Data, ErrorBase, ErrorData};
pub use error::{Error, Result};
pub use local::{make_local_bridge, CloneFn, LocalBridgeOptions, LocalBridgePair};
pub use magic::Magic;
pub use object::{bridgify, AsObj, Bridgeable, DynObject, DynObjectBuilder, MethodFuture, Obj};
pub use proxy::Proxy;
pub use shared::{share_data, ON_HOOK, WATCH_HOOK};
