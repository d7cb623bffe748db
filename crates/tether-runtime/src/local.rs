//! An in-process bridge pair for tests and demos.

use std::sync::{Arc, OnceLock};

use tether_protocol::Message;

use crate::bridge::{Bridge, BridgeOptions};
use crate::data::Data;
use crate::error::{Error, Result};
use crate::object::AsObj;
use crate::proxy::Proxy;

/// Hook applied to every message crossing a local bridge, in both
/// directions. Tests use a serde round-trip here to prove the wire shapes
/// are JSON-safe; the default is the identity.
pub type CloneFn = Arc<dyn Fn(Message) -> Message + Send + Sync>;

/// Options for [`make_local_bridge`].
#[derive(Default)]
pub struct LocalBridgeOptions {
    pub clone_message: Option<CloneFn>,
    pub throttle_ms: u64,
    pub hide_properties: Vec<String>,
}

/// Both peers of an in-process bridge.
pub struct LocalBridgePair {
    pub server: Arc<Bridge>,
    pub client: Arc<Bridge>,
}

/// Bridges `obj` to an in-process client peer and resolves with its proxy.
///
/// The server peer's flushes feed the client's `handle_message` directly
/// (through the `clone_message` hook) and vice versa, so calls on the
/// returned proxy round-trip exactly like they would across a real
/// transport.
pub async fn make_local_bridge(
    obj: &impl AsObj,
    options: LocalBridgeOptions,
) -> Result<(Arc<Proxy>, LocalBridgePair)> {
    let clone_message: CloneFn = options
        .clone_message
        .unwrap_or_else(|| Arc::new(|message| message));

    // The server's transport needs the client, which does not exist yet;
    // it is filled in below, before any traffic flows.
    let client_slot: Arc<OnceLock<Arc<Bridge>>> = Arc::new(OnceLock::new());

    let server = {
        let slot = Arc::clone(&client_slot);
        let clone_message = Arc::clone(&clone_message);
        let mut opts = BridgeOptions::new(move |message| {
            if let Some(peer) = slot.get() {
                if let Err(err) = peer.handle_message(clone_message.as_ref()(message)) {
                    tracing::error!(error = %err, "local bridge client rejected message");
                }
            }
        });
        opts.throttle_ms = options.throttle_ms;
        opts.hide_properties = options.hide_properties.clone();
        Bridge::new(opts)
    };

    let client = {
        let peer = Arc::clone(&server);
        let clone_message = Arc::clone(&clone_message);
        let mut opts = BridgeOptions::new(move |message| {
            if let Err(err) = peer.handle_message(clone_message.as_ref()(message)) {
                tracing::error!(error = %err, "local bridge server rejected message");
            }
        });
        opts.throttle_ms = options.throttle_ms;
        opts.hide_properties = options.hide_properties;
        Bridge::new(opts)
    };

    let _ = client_slot.set(Arc::clone(&client));

    server.send_root(obj);
    let root = client.get_root().await?;
    let Data::Object(root_obj) = root else {
        return Err(Error::Mismatch {
            expected: "bridgeable root object",
            path: "root".to_string(),
        });
    };
    let proxy = root_obj.downcast_arc::<Proxy>().map_err(|_| Error::Mismatch {
        expected: "proxy root",
        path: "root".to_string(),
    })?;

    Ok((proxy, LocalBridgePair { server, client }))
}
