//! The bridge peer: registries, outbox, throttled flush and dispatch.
//!
//! A [`Bridge`] owns two id-keyed registries (objects this peer has
//! admitted, proxies standing in for the other peer's objects), the
//! pending-call table correlating calls with returns, and the per-tick
//! outbox that coalesces everything that happened since the previous flush
//! into one message.
//!
//! # Message Flow
//!
//! 1. User code mutates state and calls `update`, `emit`, a proxy method,
//!    or `close`
//! 2. The corresponding `emit_*` entry point packs payloads into the outbox
//! 3. `wakeup` schedules a single deferred flush (zero delay still yields,
//!    so one synchronous burst becomes one message)
//! 4. `send_now` diffs dirty objects, seals the outbox and hands it to the
//!    transport
//! 5. The other peer feeds the message to `handle_message`, which
//!    reconciles the object graph, dispatches events, runs calls and
//!    settles returns

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};

use tether_protocol::{
    CallId, CallRecord, ChangeRecord, EventRecord, LocalId, Message, PackedId, ReturnRecord,
};

use crate::api;
use crate::codec::data::{pack_data, pack_throw, unpack_data};
use crate::codec::object::{
    diff_object, make_proxy, pack_object, update_object_props, CacheSlot, ValueCache,
};
use crate::data::{Data, ErrorData};
use crate::error::{Error, Result};
use crate::object::{AsObj, Bridgeable, Obj};
use crate::proxy::Proxy;

/// The transport callback: receives each sealed outgoing message.
pub type SendFn = Box<dyn Fn(Message) + Send + Sync>;

/// Construction options for a bridge peer.
pub struct BridgeOptions {
    /// Delivers outgoing messages to the transport.
    pub send_message: SendFn,
    /// Minimum spacing between flushes, in milliseconds. Zero flushes on
    /// the next tick.
    pub throttle_ms: u64,
    /// Property names excluded from enumeration on fabricated proxies
    /// (still readable by name).
    pub hide_properties: Vec<String>,
}

impl BridgeOptions {
    pub fn new(send_message: impl Fn(Message) + Send + Sync + 'static) -> Self {
        Self {
            send_message: Box::new(send_message),
            throttle_ms: 0,
            hide_properties: Vec::new(),
        }
    }
}

struct PendingCall {
    name: String,
    tx: oneshot::Sender<Result<Data>>,
}

#[derive(Default)]
struct State {
    objects: IndexMap<LocalId, Obj>,
    caches: IndexMap<LocalId, ValueCache>,
    proxies: IndexMap<LocalId, Arc<Proxy>>,
    dirty: IndexSet<LocalId>,
    pending: HashMap<CallId, PendingCall>,
    next_call_id: CallId,
    outbox: Message,
    closed: bool,
    send_pending: bool,
    last_flush: Option<Instant>,
}

/// One end of a symmetric object bridge.
pub struct Bridge {
    send_message: SendFn,
    throttle: Duration,
    hide_properties: Vec<String>,
    state: Mutex<State>,
    root: Mutex<Option<Data>>,
    root_notify: Notify,
}

impl Bridge {
    pub fn new(options: BridgeOptions) -> Arc<Self> {
        Arc::new(Self {
            send_message: options.send_message,
            throttle: Duration::from_millis(options.throttle_ms),
            hide_properties: options.hide_properties,
            state: Mutex::new(State::default()),
            root: Mutex::new(None),
            root_notify: Notify::new(),
        })
    }

    /// True once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    // --- outgoing ----------------------------------------------------------

    /// Resolves an object to its wire id, admitting it on first encounter.
    ///
    /// Returns `None` for closed objects (packed as `null`), the negated
    /// remote id for proxies this bridge holds, and the object's own id
    /// otherwise. Admission reserves the registry entry before packing the
    /// snapshot, so a container holding the same object twice yields one id
    /// and the children's create records land in the outbox first.
    pub fn get_packed_id(self: &Arc<Self>, obj: &Obj) -> Option<PackedId> {
        let magic = obj.magic();
        if magic.is_closed() {
            return None;
        }
        if let Some(remote_id) = magic.remote_id() {
            if self.state.lock().proxies.contains_key(&remote_id) {
                return Some(-(remote_id as PackedId));
            }
        }
        let local_id = magic.local_id();
        {
            let mut st = self.state.lock();
            if st.objects.contains_key(&local_id) {
                return Some(local_id as PackedId);
            }
            st.objects.insert(local_id, obj.clone());
            st.caches.insert(local_id, ValueCache::new());
        }
        magic.add_bridge(self);
        tracing::debug!(local_id, "admitting object");
        let (cache, create) = pack_object(self, obj);
        {
            let mut st = self.state.lock();
            st.caches.insert(local_id, cache);
            st.outbox.created.push(create);
        }
        self.wakeup();
        Some(local_id as PackedId)
    }

    /// Resolves a wire id back to a live handle: positive ids name the
    /// sender's objects (our proxies), negative ids name our own objects.
    pub fn get_object(&self, packed: PackedId) -> Option<Obj> {
        let st = self.state.lock();
        if packed > 0 {
            st.proxies.get(&(packed as LocalId)).cloned().map(|proxy| {
                let obj: Obj = proxy;
                obj
            })
        } else if packed < 0 {
            st.objects.get(&packed.unsigned_abs()).cloned()
        } else {
            None
        }
    }

    /// Queues an object for diffing at the next flush. A property name
    /// stamps that cache slot dirty, forcing a re-pack even if the value
    /// compares equal.
    pub(crate) fn mark_dirty(self: &Arc<Self>, local_id: LocalId, name: Option<&str>) {
        {
            let mut st = self.state.lock();
            if st.closed || !st.objects.contains_key(&local_id) {
                return;
            }
            st.dirty.insert(local_id);
            if let Some(name) = name {
                if let Some(slot) = st
                    .caches
                    .get_mut(&local_id)
                    .and_then(|cache| cache.get_mut(name))
                {
                    *slot = CacheSlot::Dirty;
                }
            }
        }
        self.wakeup();
    }

    /// Evicts a closing object and queues its close notification.
    pub(crate) fn emit_close(self: &Arc<Self>, local_id: LocalId) {
        {
            let mut st = self.state.lock();
            if st.objects.shift_remove(&local_id).is_none() {
                return;
            }
            st.caches.shift_remove(&local_id);
            st.dirty.shift_remove(&local_id);
            if st.closed {
                return;
            }
            st.outbox.closed.push(local_id);
        }
        self.wakeup();
    }

    /// Queues a method call on a remote object and returns the future that
    /// settles when its return record arrives. Dropping the future drops
    /// the pending entry.
    pub(crate) fn emit_call(self: &Arc<Self>, remote_id: LocalId, name: &str, args: Vec<Data>) -> CallFuture {
        if self.state.lock().closed {
            return CallFuture::ready(Err(Error::BridgeClosed));
        }
        let payload = pack_data(self, &Data::List(args));
        let (tx, rx) = oneshot::channel();
        let call_id = {
            let mut st = self.state.lock();
            if st.closed {
                return CallFuture::ready(Err(Error::BridgeClosed));
            }
            st.next_call_id += 1;
            let call_id = st.next_call_id;
            st.pending.insert(
                call_id,
                PendingCall {
                    name: name.to_string(),
                    tx,
                },
            );
            st.outbox.calls.push(CallRecord {
                call_id,
                remote_id,
                name: name.to_string(),
                payload,
            });
            call_id
        };
        self.wakeup();
        CallFuture::waiting(
            rx,
            CancelGuard {
                call_id,
                bridge: Arc::downgrade(self),
                completed: false,
            },
        )
    }

    /// Queues a named event on an object this peer owns. `local_id` zero
    /// addresses the bridge root (the root handshake).
    pub(crate) fn emit_event(self: &Arc<Self>, local_id: LocalId, name: &str, payload: &Data) {
        if self.state.lock().closed {
            return;
        }
        let payload = pack_data(self, payload);
        {
            let mut st = self.state.lock();
            if st.closed {
                return;
            }
            st.outbox.events.push(EventRecord {
                local_id,
                name: name.to_string(),
                payload,
            });
        }
        self.wakeup();
    }

    /// Queues the settlement of an incoming call.
    pub(crate) fn emit_return(
        self: &Arc<Self>,
        call_id: CallId,
        result: std::result::Result<Data, ErrorData>,
    ) {
        if self.state.lock().closed {
            return;
        }
        let payload = match result {
            Ok(value) => pack_data(self, &value),
            Err(err) => pack_throw(self, &Data::error(err)),
        };
        {
            let mut st = self.state.lock();
            if st.closed {
                return;
            }
            st.outbox.returns.push(ReturnRecord { call_id, payload });
        }
        self.wakeup();
    }

    // --- flush -------------------------------------------------------------

    /// Schedules a flush unless one is already pending. The deferred task
    /// waits out the throttle window measured from the previous flush; a
    /// zero delay still yields first, so a method body that mutates several
    /// fields before returning produces exactly one flush.
    fn wakeup(self: &Arc<Self>) {
        let delay = {
            let mut st = self.state.lock();
            if st.closed || st.send_pending {
                return;
            }
            st.send_pending = true;
            match st.last_flush {
                Some(at) => (at + self.throttle).saturating_duration_since(Instant::now()),
                None => Duration::ZERO,
            }
        };
        let bridge = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            bridge.send_now();
        });
    }

    /// Diffs every dirty object, seals the outbox and hands the batch to
    /// the transport. Empty batches are never sent.
    pub fn send_now(self: &Arc<Self>) {
        let mut to_diff: Vec<(LocalId, Obj, ValueCache)> = Vec::new();
        {
            let mut st = self.state.lock();
            if st.closed {
                st.send_pending = false;
                return;
            }
            st.send_pending = false;
            st.last_flush = Some(Instant::now());
            let dirty: Vec<LocalId> = st.dirty.drain(..).collect();
            for local_id in dirty {
                let obj = st.objects.get(&local_id).cloned();
                let cache = st.caches.shift_remove(&local_id);
                if let (Some(obj), Some(cache)) = (obj, cache) {
                    to_diff.push((local_id, obj, cache));
                }
            }
        }

        let mut changes: Vec<ChangeRecord> = Vec::new();
        for (local_id, obj, mut cache) in to_diff {
            let props = diff_object(self, &obj, &mut cache);
            {
                let mut st = self.state.lock();
                if !st.objects.contains_key(&local_id) {
                    // Closed while diffing; drop the stale cache.
                    continue;
                }
                st.caches.insert(local_id, cache);
            }
            if !props.is_empty() {
                changes.push(ChangeRecord { local_id, props });
            }
        }

        let message = {
            let mut st = self.state.lock();
            if st.closed {
                return;
            }
            st.outbox.changed.extend(changes);
            if st.outbox.is_empty() {
                return;
            }
            std::mem::take(&mut st.outbox)
        };
        tracing::debug!(
            created = message.created.len(),
            changed = message.changed.len(),
            events = message.events.len(),
            calls = message.calls.len(),
            returns = message.returns.len(),
            closed = message.closed.len(),
            "flushing"
        );
        (self.send_message)(message);
    }

    // --- incoming ----------------------------------------------------------

    /// Processes one incoming batch, in three strictly ordered phases:
    /// object-graph reconciliation, then events/calls/returns, then
    /// closures. Still accepted after [`close`](Self::close) so in-flight
    /// returns drain, but generates no outbound traffic.
    pub fn handle_message(self: &Arc<Self>, message: Message) -> Result<()> {
        // A closed peer only drains: late returns and closures are
        // tolerated, nothing is created or executed.
        let closed = self.state.lock().closed;

        // Phase 1: creates, in two passes - every proxy named in this
        // message must exist before any property batch is unpacked,
        // because values of one new object may reference another.
        let mut fresh: Vec<Arc<Proxy>> = Vec::new();
        let mut fresh_props = Vec::new();
        for create in message.created {
            if closed {
                break;
            }
            if self.state.lock().proxies.contains_key(&create.local_id) {
                tracing::debug!(local_id = create.local_id, "duplicate create ignored");
                continue;
            }
            let proxy = make_proxy(self, &create, self.hide_properties.clone());
            self.state
                .lock()
                .proxies
                .insert(create.local_id, proxy.clone());
            fresh.push(proxy);
            fresh_props.push(create.props);
        }
        for (proxy, props) in fresh.iter().zip(&fresh_props) {
            update_object_props(self, proxy.magic(), props);
        }

        // Changes apply the same way, then watchers fire in a second pass
        // so every callback observes the fully updated graph.
        let mut moved: Vec<(Arc<Proxy>, Vec<String>)> = Vec::new();
        for change in message.changed {
            if closed {
                break;
            }
            let proxy = self
                .state
                .lock()
                .proxies
                .get(&change.local_id)
                .cloned()
                .ok_or(Error::InvalidLocalId(change.local_id))?;
            update_object_props(self, proxy.magic(), &change.props);
            let names = change.props.keys().cloned().collect();
            moved.push((proxy, names));
        }
        for (proxy, names) in moved {
            let obj: Obj = proxy;
            for name in names {
                api::run_watchers(&obj, Some(&name));
            }
        }

        // Phase 2: events, calls, returns.
        for event in message.events {
            if closed {
                break;
            }
            self.handle_event(event);
        }
        for call in message.calls {
            if closed {
                break;
            }
            self.handle_call(call);
        }
        for ret in message.returns {
            let pending = match self.state.lock().pending.remove(&ret.call_id) {
                Some(pending) => pending,
                None if closed => {
                    tracing::debug!(call_id = ret.call_id, "late return after close");
                    continue;
                }
                None => return Err(Error::InvalidCallId(ret.call_id)),
            };
            let result = unpack_data(self, &ret.payload, &format!("return of '{}'", pending.name));
            let _ = pending.tx.send(result);
        }

        // Phase 3: closures.
        for local_id in message.closed {
            let proxy = self.state.lock().proxies.shift_remove(&local_id);
            if let Some(proxy) = proxy {
                tracing::debug!(local_id, "remote closed object");
                let obj: Obj = proxy;
                api::close_local(&obj);
            }
        }
        Ok(())
    }

    fn handle_event(self: &Arc<Self>, event: EventRecord) {
        let path = format!("event '{}'", event.name);
        if event.local_id == 0 {
            match unpack_data(self, &event.payload, &path) {
                Ok(value) => self.dispatch_root(&event.name, value),
                Err(err) => {
                    tracing::warn!(event = %event.name, error = %err, "root event failed to unpack");
                }
            }
            return;
        }
        let target = self.state.lock().proxies.get(&event.local_id).cloned();
        let Some(proxy) = target else {
            tracing::debug!(local_id = event.local_id, event = %event.name, "event for unknown object ignored");
            return;
        };
        let obj: Obj = proxy;
        match unpack_data(self, &event.payload, &path) {
            Ok(value) => api::emit_local(&obj, &event.name, value),
            Err(err) => api::emit_local(&obj, "error", Data::error(ErrorData::from(err))),
        }
    }

    fn handle_call(self: &Arc<Self>, call: CallRecord) {
        let target = self.state.lock().objects.get(&call.remote_id).cloned();
        let Some(obj) = target else {
            self.emit_return(
                call.call_id,
                Err(ErrorData::type_error(format!(
                    "Cannot call method '{}' of closed proxy",
                    call.name
                ))),
            );
            return;
        };
        if !obj.method_names().iter().any(|m| m == &call.name) {
            self.emit_return(
                call.call_id,
                Err(ErrorData::type_error(format!(
                    "'{}' is not a function",
                    call.name
                ))),
            );
            return;
        }
        let args = match unpack_data(self, &call.payload, &format!("arguments of '{}'", call.name))
        {
            Ok(Data::List(items)) => items,
            Ok(_) => {
                self.emit_return(
                    call.call_id,
                    Err(ErrorData::type_error(format!(
                        "Malformed arguments for '{}'",
                        call.name
                    ))),
                );
                return;
            }
            Err(err) => {
                self.emit_return(call.call_id, Err(ErrorData::from(err)));
                return;
            }
        };
        let bridge = Arc::clone(self);
        let call_id = call.call_id;
        let future = obj.call(call.name, args);
        tokio::spawn(async move {
            let result = future.await;
            bridge.emit_return(call_id, result);
        });
    }

    fn dispatch_root(&self, name: &str, value: Data) {
        match name {
            "root" => {
                *self.root.lock() = Some(value);
                self.root_notify.notify_waiters();
            }
            "error" => tracing::warn!(value = ?value, "peer reported bridge error"),
            other => tracing::debug!(event = other, "unhandled bridge event"),
        }
    }

    // --- root handshake and peer-wide close ---------------------------------

    /// Offers an object as this peer's root. The other side observes it via
    /// [`get_root`](Self::get_root).
    pub fn send_root(self: &Arc<Self>, obj: &impl AsObj) {
        self.emit_event(0, "root", &Data::Object(obj.as_obj()));
    }

    /// Resolves with whatever the other peer offered as its root.
    ///
    /// Registers the waiter before checking, so a root that lands between
    /// the check and the wait is not missed.
    pub async fn get_root(&self) -> Result<Data> {
        loop {
            let notified = self.root_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(value) = self.root.lock().clone() {
                return Ok(value);
            }
            if self.state.lock().closed {
                return Err(Error::BridgeClosed);
            }
            notified.await;
        }
    }

    /// Tears the peer down: every pending call rejects with `error`, every
    /// proxy closes (firing its `close` listeners), and no further outbound
    /// traffic is produced. Incoming messages are still drained.
    pub fn close(self: &Arc<Self>, error: ErrorData) {
        let (pending, proxies, objects) = {
            let mut st = self.state.lock();
            if st.closed {
                return;
            }
            st.closed = true;
            st.outbox = Message::default();
            st.dirty.clear();
            st.caches.clear();
            (
                std::mem::take(&mut st.pending),
                std::mem::take(&mut st.proxies),
                std::mem::take(&mut st.objects),
            )
        };
        tracing::debug!(
            pending = pending.len(),
            proxies = proxies.len(),
            error = %error,
            "closing bridge"
        );
        for (_, call) in pending {
            let _ = call.tx.send(Err(Error::Remote(error.clone())));
        }
        for (_, obj) in objects {
            obj.magic().remove_bridge(self);
        }
        for (_, proxy) in proxies {
            let obj: Obj = proxy;
            api::close_local(&obj);
        }
        self.root_notify.notify_waiters();
    }
}

/// RAII guard dropping the pending-call entry if the future is abandoned.
struct CancelGuard {
    call_id: CallId,
    bridge: Weak<Bridge>,
    completed: bool,
}

impl CancelGuard {
    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        if let Some(bridge) = self.bridge.upgrade() {
            if bridge.state.lock().pending.remove(&self.call_id).is_some() {
                tracing::debug!(call_id = self.call_id, "removed abandoned call");
            }
        }
    }
}

enum CallFutureInner {
    Ready(Option<Result<Data>>),
    Waiting {
        rx: oneshot::Receiver<Result<Data>>,
        guard: CancelGuard,
    },
}

/// Future returned by proxy method stubs, resolving when the matching
/// return record arrives (or rejecting immediately for closed targets).
pub struct CallFuture {
    inner: CallFutureInner,
}

impl CallFuture {
    pub(crate) fn ready(result: Result<Data>) -> Self {
        Self {
            inner: CallFutureInner::Ready(Some(result)),
        }
    }

    fn waiting(rx: oneshot::Receiver<Result<Data>>, guard: CancelGuard) -> Self {
        Self {
            inner: CallFutureInner::Waiting { rx, guard },
        }
    }
}

impl Future for CallFuture {
    type Output = Result<Data>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            CallFutureInner::Ready(slot) => {
                Poll::Ready(slot.take().unwrap_or(Err(Error::ChannelClosed)))
            }
            CallFutureInner::Waiting { rx, guard } => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => {
                    guard.complete();
                    Poll::Ready(result)
                }
                Poll::Ready(Err(_)) => {
                    guard.complete();
                    Poll::Ready(Err(Error::ChannelClosed))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
