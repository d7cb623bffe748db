//! User-visible verbs: `emit`, `update`, `close`, `add_listener`,
//! `add_watcher`.
//!
//! Every verb routes through the object's [`Magic`](crate::magic::Magic)
//! record and fans out to the bridges currently holding the object. Local
//! listeners fire synchronously; remote peers observe the same traffic
//! after the next flush.

use std::sync::{Arc, Weak};

use crate::data::{Data, ErrorData};
use crate::object::{AsObj, Bridgeable, Obj};

/// Emits a named event: queued on every subscribed bridge, then dispatched
/// synchronously to local listeners.
///
/// A listener returning `Err` re-emits an `error` event on the same object,
/// except when the failing event *is* `error` (swallowed to avoid
/// recursion).
pub fn emit(obj: &impl AsObj, name: &str, payload: impl Into<Data>) {
    let obj = obj.as_obj();
    let payload = payload.into();
    let magic = obj.magic();
    if !magic.is_closed() {
        for bridge in magic.bridges() {
            bridge.emit_event(magic.local_id(), name, &payload);
        }
    }
    emit_local(&obj, name, payload);
}

/// Dispatches an event to local listeners only. Used by `handle_message`
/// for incoming remote events (which must not echo back over the wire).
pub(crate) fn emit_local(obj: &Obj, name: &str, payload: Data) {
    for listener in obj.magic().listeners_for(name) {
        if let Err(err) = listener.as_ref()(payload.clone()) {
            if name == "error" {
                tracing::warn!(error = %err, "error listener failed");
            } else {
                emit_local(obj, "error", Data::error(err));
            }
        }
    }
}

/// Marks the object dirty on every subscribed bridge and re-fires local
/// watchers whose cached value moved.
pub fn update(obj: &impl AsObj) {
    let obj = obj.as_obj();
    let magic = obj.magic();
    if magic.is_closed() {
        return;
    }
    for bridge in magic.bridges() {
        bridge.mark_dirty(magic.local_id(), None);
    }
    run_watchers(&obj, None);
}

/// Like [`update`], targeting one property: the bridge-side cache slot is
/// stamped dirty and the watcher cache for `name` is invalidated, so both
/// re-fire even when the value compares equal.
pub fn update_prop(obj: &impl AsObj, name: &str) {
    let obj = obj.as_obj();
    let magic = obj.magic();
    if magic.is_closed() {
        return;
    }
    for bridge in magic.bridges() {
        bridge.mark_dirty(magic.local_id(), Some(name));
    }
    magic.invalidate_watcher(name);
    run_watchers(&obj, Some(name));
}

/// Walks the object's watchers (optionally a single name), firing every
/// callback whose last-seen value differs from the current property value.
/// Getter failures are swallowed; the read is retried next cycle.
pub(crate) fn run_watchers(obj: &Obj, only: Option<&str>) {
    let magic = obj.magic();
    for name in magic.watch_names() {
        if only.is_some_and(|n| n != name) {
            continue;
        }
        let Ok(current) = obj.property(&name) else {
            continue;
        };
        if magic.watcher_advance(&name, &current) {
            for watcher in magic.watcher_callbacks(&name) {
                watcher.as_ref()(current.clone());
            }
        }
    }
}

/// Closes a bridgeable object: `close` listeners fire first, then the
/// object is marked closed, every subscribed bridge emits its closure, and
/// subscriptions are torn down. One-shot.
pub fn close(obj: &impl AsObj) {
    let obj = obj.as_obj();
    let magic = obj.magic();
    if magic.is_closed() {
        return;
    }
    emit_local(&obj, "close", Data::Undefined);
    magic.set_closed();
    for bridge in magic.bridges() {
        bridge.emit_close(magic.local_id());
    }
    magic.clear_subscriptions();
    magic.clear_bridges();
}

/// The local half of a close: fires `close` listeners and tears down
/// subscriptions without notifying any bridge. Used when the *remote* peer
/// closed the object (phase 3) and on peer-wide close.
pub(crate) fn close_local(obj: &Obj) {
    let magic = obj.magic();
    if magic.is_closed() {
        return;
    }
    emit_local(obj, "close", Data::Undefined);
    magic.set_closed();
    magic.clear_subscriptions();
    magic.clear_bridges();
}

/// Installs a listener for a named event. The callback may reject; see
/// [`emit`] for the error-routing rules.
pub fn add_listener<F>(obj: &impl AsObj, name: &str, f: F) -> Subscription
where
    F: Fn(Data) -> std::result::Result<(), ErrorData> + Send + Sync + 'static,
{
    let obj = obj.as_obj();
    let magic = obj.magic();
    if magic.is_closed() {
        return Subscription::noop();
    }
    let id = magic.add_listener(name, Arc::new(f));
    Subscription {
        target: Some(Arc::downgrade(&obj)),
        kind: SubscriptionKind::Listener,
        name: name.to_string(),
        id,
    }
}

/// Installs a property watcher, seeded with the property's current value
/// so it fires on change rather than on installation.
pub fn add_watcher<F>(obj: &impl AsObj, name: &str, f: F) -> Subscription
where
    F: Fn(Data) + Send + Sync + 'static,
{
    let obj = obj.as_obj();
    let magic = obj.magic();
    if magic.is_closed() {
        return Subscription::noop();
    }
    let initial = obj.property(name).ok();
    let id = magic.add_watcher(name, Arc::new(f), initial);
    Subscription {
        target: Some(Arc::downgrade(&obj)),
        kind: SubscriptionKind::Watcher,
        name: name.to_string(),
        id,
    }
}

enum SubscriptionKind {
    Listener,
    Watcher,
}

/// Handle for an installed listener or watcher. Dropping it (or calling
/// [`unsubscribe`](Self::unsubscribe)) removes the callback; call
/// [`detach`](Self::detach) to keep the callback installed for the
/// object's lifetime. On a closed object the handle is inert.
pub struct Subscription {
    target: Option<Weak<dyn Bridgeable>>,
    kind: SubscriptionKind,
    name: String,
    id: u64,
}

impl Subscription {
    fn noop() -> Self {
        Self {
            target: None,
            kind: SubscriptionKind::Listener,
            name: String::new(),
            id: 0,
        }
    }

    /// Removes the callback now.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Leaves the callback installed until the object closes.
    pub fn detach(mut self) {
        self.target = None;
    }

    fn remove(&mut self) {
        if let Some(obj) = self.target.take().and_then(|weak| weak.upgrade()) {
            match self.kind {
                SubscriptionKind::Listener => obj.magic().remove_listener(&self.name, self.id),
                SubscriptionKind::Watcher => obj.magic().remove_watcher(&self.name, self.id),
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}
