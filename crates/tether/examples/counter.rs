//! Two bridge peers over an in-process channel pair.
//!
//! Run with: cargo run -p tether --example counter

use std::sync::Arc;

use tokio::sync::mpsc;

use tether::{
    add_watcher, update, Bridge, BridgeOptions, Data, DynObject, Message, Result,
};

fn spawn_peer(name: &'static str, outgoing: mpsc::UnboundedSender<Message>) -> Arc<Bridge> {
    Bridge::new(BridgeOptions::new(move |message| {
        if outgoing.send(message).is_err() {
            tracing::warn!(peer = name, "peer hung up");
        }
    }))
}

fn pump(bridge: Arc<Bridge>, mut incoming: mpsc::UnboundedReceiver<Message>) {
    tokio::spawn(async move {
        while let Some(message) = incoming.recv().await {
            if let Err(err) = bridge.handle_message(message) {
                tracing::error!(error = %err, "failed to process message");
            }
        }
    });
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tether_runtime=debug".into()),
        )
        .init();

    let counter = DynObject::builder()
        .prop("count", 0i64)
        .method("increment", |obj, args| {
            Box::pin(async move {
                let step = args.first().and_then(Data::as_i64).unwrap_or(1);
                let next = obj.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + step;
                obj.set("count", next);
                update(&obj);
                Ok(Data::Int(next))
            })
        })
        .build();

    let (to_client, from_server) = mpsc::unbounded_channel();
    let (to_server, from_client) = mpsc::unbounded_channel();

    let server = spawn_peer("server", to_client);
    let client = spawn_peer("client", to_server);
    pump(Arc::clone(&client), from_server);
    pump(Arc::clone(&server), from_client);

    server.send_root(&counter);
    let root = client.get_root().await?;
    let proxy = root
        .as_object()
        .expect("root is an object")
        .clone()
        .downcast_arc::<tether::Proxy>()
        .ok()
        .expect("root is a proxy");

    add_watcher(&proxy, "count", |value| {
        tracing::info!(count = value.as_i64().unwrap_or(-1), "count changed");
    })
    .detach();

    for _ in 0..3 {
        let result = proxy.call("increment", vec![Data::Int(2)]).await?;
        tracing::info!(returned = ?result, "increment resolved");
    }

    tracing::info!(
        count = proxy.get("count")?.as_i64().unwrap_or(-1),
        "final mirrored value"
    );
    Ok(())
}
