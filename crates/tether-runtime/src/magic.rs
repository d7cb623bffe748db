//! The hidden per-object metadata record.
//!
//! Every bridgeable object embeds a [`Magic`] and exposes it through
//! [`Bridgeable::magic`](crate::object::Bridgeable::magic). It carries the
//! object's identity, its one-shot closed flag, the bridges currently
//! holding it, and its listener/watcher tables. Proxies additionally carry
//! their remote id and the synchronous property cache.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use tether_protocol::LocalId;

use crate::bridge::Bridge;
use crate::data::{Data, ErrorData};

/// Named-event callback. A returned `Err` is re-emitted as an `error`
/// event on the same object.
pub type ListenerFn = Arc<dyn Fn(Data) -> std::result::Result<(), ErrorData> + Send + Sync>;

/// Property-change callback, invoked with the new value.
pub type WatcherFn = Arc<dyn Fn(Data) + Send + Sync>;

/// Process-wide monotonic id source. Ids are never reused and never zero.
static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

fn next_local_id() -> LocalId {
    NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed)
}

struct WatcherSlot {
    last_seen: Option<Data>,
    callbacks: Vec<(u64, WatcherFn)>,
}

#[derive(Default)]
struct Subscriptions {
    bridges: Vec<Weak<Bridge>>,
    listeners: IndexMap<String, Vec<(u64, ListenerFn)>>,
    watchers: IndexMap<String, WatcherSlot>,
    next_sub_id: u64,
}

struct ProxyState {
    remote_id: LocalId,
    hooks: Vec<String>,
    props: Mutex<IndexMap<String, std::result::Result<Data, ErrorData>>>,
}

/// Hidden metadata attached to every bridgeable object.
pub struct Magic {
    local_id: OnceLock<LocalId>,
    closed: AtomicBool,
    subs: Mutex<Subscriptions>,
    proxy: Option<ProxyState>,
}

impl Magic {
    /// A record for a locally owned object.
    pub fn new() -> Self {
        Self {
            local_id: OnceLock::new(),
            closed: AtomicBool::new(false),
            subs: Mutex::new(Subscriptions::default()),
            proxy: None,
        }
    }

    /// A record for a fabricated proxy standing in for `remote_id`.
    pub(crate) fn for_proxy(remote_id: LocalId, hooks: Vec<String>) -> Self {
        Self {
            local_id: OnceLock::new(),
            closed: AtomicBool::new(false),
            subs: Mutex::new(Subscriptions::default()),
            proxy: Some(ProxyState {
                remote_id,
                hooks,
                props: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// The object's local id, assigned from the process-wide counter on
    /// first use. Idempotent.
    pub fn local_id(&self) -> LocalId {
        *self.local_id.get_or_init(next_local_id)
    }

    /// The local id if one has been assigned yet.
    pub fn peek_local_id(&self) -> Option<LocalId> {
        self.local_id.get().copied()
    }

    /// For proxies, the id of the object on the owning peer.
    pub fn remote_id(&self) -> Option<LocalId> {
        self.proxy.as_ref().map(|p| p.remote_id)
    }

    /// Subscription-hook names announced in this proxy's create record.
    pub fn hooks(&self) -> Vec<String> {
        self.proxy
            .as_ref()
            .map(|p| p.hooks.clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the object closed. Returns `true` the first time only.
    pub fn set_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    // --- bridge membership -------------------------------------------------

    pub(crate) fn add_bridge(&self, bridge: &Arc<Bridge>) {
        let mut subs = self.subs.lock();
        let present = subs
            .bridges
            .iter()
            .any(|w| w.as_ptr() == Arc::as_ptr(bridge));
        if !present {
            subs.bridges.push(Arc::downgrade(bridge));
        }
    }

    pub(crate) fn remove_bridge(&self, bridge: &Arc<Bridge>) {
        self.subs
            .lock()
            .bridges
            .retain(|w| w.as_ptr() != Arc::as_ptr(bridge));
    }

    /// The live bridges currently holding this object.
    pub(crate) fn bridges(&self) -> Vec<Arc<Bridge>> {
        let mut subs = self.subs.lock();
        subs.bridges.retain(|w| w.strong_count() > 0);
        subs.bridges.iter().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn clear_bridges(&self) {
        self.subs.lock().bridges.clear();
    }

    // --- listeners ---------------------------------------------------------

    pub(crate) fn add_listener(&self, name: &str, f: ListenerFn) -> u64 {
        let mut subs = self.subs.lock();
        subs.next_sub_id += 1;
        let id = subs.next_sub_id;
        subs.listeners
            .entry(name.to_string())
            .or_default()
            .push((id, f));
        id
    }

    pub(crate) fn remove_listener(&self, name: &str, id: u64) {
        if let Some(list) = self.subs.lock().listeners.get_mut(name) {
            list.retain(|(entry_id, _)| *entry_id != id);
        }
    }

    /// Snapshot of the callbacks for `name`, so dispatch runs without the
    /// lock held.
    pub(crate) fn listeners_for(&self, name: &str) -> Vec<ListenerFn> {
        self.subs
            .lock()
            .listeners
            .get(name)
            .map(|list| list.iter().map(|(_, f)| f.clone()).collect())
            .unwrap_or_default()
    }

    // --- watchers ----------------------------------------------------------

    /// Installs a watcher. `initial` seeds the last-seen cache the first
    /// time `name` is watched, so the callback fires on change rather than
    /// on installation.
    pub(crate) fn add_watcher(&self, name: &str, f: WatcherFn, initial: Option<Data>) -> u64 {
        let mut subs = self.subs.lock();
        subs.next_sub_id += 1;
        let id = subs.next_sub_id;
        let slot = subs
            .watchers
            .entry(name.to_string())
            .or_insert_with(|| WatcherSlot {
                last_seen: initial,
                callbacks: Vec::new(),
            });
        slot.callbacks.push((id, f));
        id
    }

    pub(crate) fn remove_watcher(&self, name: &str, id: u64) {
        if let Some(slot) = self.subs.lock().watchers.get_mut(name) {
            slot.callbacks.retain(|(entry_id, _)| *entry_id != id);
        }
    }

    pub(crate) fn watch_names(&self) -> Vec<String> {
        self.subs.lock().watchers.keys().cloned().collect()
    }

    /// Forgets the last-seen value for `name`, forcing the next comparison
    /// to report a change even if the value is identical.
    pub(crate) fn invalidate_watcher(&self, name: &str) {
        if let Some(slot) = self.subs.lock().watchers.get_mut(name) {
            slot.last_seen = None;
        }
    }

    /// Compares `current` against the last value the watchers saw. On a
    /// difference the cache is advanced and `true` is returned.
    pub(crate) fn watcher_advance(&self, name: &str, current: &Data) -> bool {
        let mut subs = self.subs.lock();
        let Some(slot) = subs.watchers.get_mut(name) else {
            return false;
        };
        if slot.last_seen.as_ref() == Some(current) {
            return false;
        }
        slot.last_seen = Some(current.clone());
        true
    }

    pub(crate) fn watcher_callbacks(&self, name: &str) -> Vec<WatcherFn> {
        self.subs
            .lock()
            .watchers
            .get(name)
            .map(|slot| slot.callbacks.iter().map(|(_, f)| f.clone()).collect())
            .unwrap_or_default()
    }

    /// Drops every listener and watcher. Called on close.
    pub(crate) fn clear_subscriptions(&self) {
        let mut subs = self.subs.lock();
        subs.listeners.clear();
        subs.watchers.clear();
    }

    // --- proxy property cache ----------------------------------------------

    pub(crate) fn proxy_get(&self, name: &str) -> Option<std::result::Result<Data, ErrorData>> {
        self.proxy
            .as_ref()
            .and_then(|p| p.props.lock().get(name).cloned())
    }

    pub(crate) fn proxy_set(&self, name: &str, value: std::result::Result<Data, ErrorData>) {
        if let Some(p) = self.proxy.as_ref() {
            p.props.lock().insert(name.to_string(), value);
        }
    }

    pub(crate) fn proxy_prop_names(&self) -> Vec<String> {
        self.proxy
            .as_ref()
            .map(|p| p.props.lock().keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for Magic {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_are_assigned_once_and_monotonic() {
        let a = Magic::new();
        let b = Magic::new();
        let id_a = a.local_id();
        assert_eq!(a.local_id(), id_a);
        assert!(b.local_id() > id_a);
        assert_eq!(a.peek_local_id(), Some(id_a));
    }

    #[test]
    fn closed_is_one_shot() {
        let magic = Magic::new();
        assert!(!magic.is_closed());
        assert!(magic.set_closed());
        assert!(!magic.set_closed());
        assert!(magic.is_closed());
    }

    #[test]
    fn watcher_advance_tracks_last_seen() {
        let magic = Magic::new();
        magic.add_watcher("count", Arc::new(|_| {}), Some(Data::Int(0)));
        assert!(!magic.watcher_advance("count", &Data::Int(0)));
        assert!(magic.watcher_advance("count", &Data::Int(1)));
        assert!(!magic.watcher_advance("count", &Data::Int(1)));
        magic.invalidate_watcher("count");
        assert!(magic.watcher_advance("count", &Data::Int(1)));
    }

    #[test]
    fn listener_removal_by_id() {
        let magic = Magic::new();
        let id = magic.add_listener("close", Arc::new(|_| Ok(())));
        assert_eq!(magic.listeners_for("close").len(), 1);
        magic.remove_listener("close", id);
        assert!(magic.listeners_for("close").is_empty());
    }

    #[test]
    fn proxy_cache_stores_values_and_errors() {
        let magic = Magic::for_proxy(9, vec!["on".to_string()]);
        assert_eq!(magic.remote_id(), Some(9));
        magic.proxy_set("count", Ok(Data::Int(4)));
        magic.proxy_set("broken", Err(ErrorData::type_error("boom")));
        assert_eq!(magic.proxy_get("count"), Some(Ok(Data::Int(4))));
        assert!(magic.proxy_get("broken").unwrap().is_err());
        assert_eq!(magic.proxy_prop_names(), vec!["count", "broken"]);
    }
}
