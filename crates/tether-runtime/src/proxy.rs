//! The client-side stand-in for a remote object.
//!
//! A proxy exposes the remote object's last-known property values
//! synchronously from its cache, forwards method calls to the owning peer
//! as call records, and keeps subscriptions entirely local. Proxies
//! implement [`Bridgeable`] themselves, so handing one back to its owner
//! (or onward to a third peer) packs like any other object.

use std::sync::{Arc, Weak};

use tether_protocol::{CreateRecord, LocalId};

use crate::bridge::{Bridge, CallFuture};
use crate::data::{Data, ErrorData};
use crate::error::{Error, Result};
use crate::magic::Magic;
use crate::object::{Bridgeable, MethodFuture};
use crate::shared;

/// A fabricated stand-in for an object owned by the other peer.
pub struct Proxy {
    magic: Magic,
    methods: Vec<String>,
    base: Option<String>,
    hidden: Vec<String>,
    bridge: Weak<Bridge>,
}

impl Proxy {
    pub(crate) fn new(bridge: &Arc<Bridge>, create: &CreateRecord, hidden: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            magic: Magic::for_proxy(create.local_id, create.on.clone()),
            methods: create.methods.clone(),
            base: create.base.clone(),
            hidden,
            bridge: Arc::downgrade(bridge),
        })
    }

    /// Id of the remote object this proxy stands in for.
    pub fn remote_id(&self) -> LocalId {
        self.magic.remote_id().unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.magic.is_closed()
    }

    /// Shared base-class name from the create record, if any.
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Synchronous property read from the cache.
    ///
    /// A property whose remote getter threw re-throws the stored error;
    /// names the remote never announced read as undefined.
    pub fn get(&self, name: &str) -> Result<Data> {
        if self.magic.hooks().iter().any(|hook| hook == name) {
            return Ok(Data::Shared(hook_share_id(name).to_string()));
        }
        match self.magic.proxy_get(name) {
            Some(Ok(value)) => Ok(value),
            Some(Err(err)) => Err(Error::Remote(err)),
            None => Ok(Data::Undefined),
        }
    }

    /// Invokes a remote method, resolving when its return record arrives.
    ///
    /// On a closed proxy this rejects immediately without emitting traffic.
    pub fn call(&self, name: &str, args: Vec<Data>) -> CallFuture {
        if self.magic.is_closed() {
            return CallFuture::ready(Err(Error::ClosedProxy {
                method: name.to_string(),
            }));
        }
        if !self.methods.iter().any(|m| m == name) {
            return CallFuture::ready(Err(Error::Remote(ErrorData::type_error(format!(
                "'{name}' is not a function"
            )))));
        }
        let Some(bridge) = self.bridge.upgrade() else {
            return CallFuture::ready(Err(Error::ChannelClosed));
        };
        bridge.emit_call(self.remote_id(), name, args)
    }
}

/// Maps a hook name to the shared constant installed under it.
fn hook_share_id(name: &str) -> &'static str {
    if name == "watch" {
        shared::WATCH_HOOK
    } else {
        shared::ON_HOOK
    }
}

impl Bridgeable for Proxy {
    fn magic(&self) -> &Magic {
        &self.magic
    }

    fn property_names(&self) -> Vec<String> {
        let mut names = self.magic.proxy_prop_names();
        names.extend(self.magic.hooks());
        names.retain(|name| !self.hidden.contains(name));
        names
    }

    fn property(&self, name: &str) -> std::result::Result<Data, ErrorData> {
        if self.magic.hooks().iter().any(|hook| hook == name) {
            return Ok(Data::Shared(hook_share_id(name).to_string()));
        }
        match self.magic.proxy_get(name) {
            Some(Ok(value)) => Ok(value),
            Some(Err(err)) => Err(err),
            None => Ok(Data::Undefined),
        }
    }

    fn method_names(&self) -> Vec<String> {
        self.methods.clone()
    }

    fn call(self: Arc<Self>, name: String, args: Vec<Data>) -> MethodFuture {
        Box::pin(async move { Proxy::call(self.as_ref(), &name, args).await.map_err(ErrorData::from) })
    }

    fn hook_names(&self) -> Vec<String> {
        self.magic.hooks()
    }

    fn base_name(&self) -> Option<String> {
        self.base.clone()
    }
}
