//! A typed registry of local listeners.
//!
//! It is only about calling local handlers (event handlers of a socket, room events of an adapter).
//! Sending data to a remote peer is a completely separate operation.
use std::{
    borrow::Borrow,
    collections::HashMap,
    hash::Hash,
    sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

/// The identifier of a registered listener, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listeners of type `H` grouped by a key of type `K`.
/// Listeners are kept in registration order.
pub struct EventRegistry<K, H> {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<K, Vec<(ListenerId, H)>>>,
}

impl<K, H> Default for EventRegistry<K, H> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash, H: Clone> EventRegistry<K, H> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for the given key.
    pub fn on(&self, key: K, handler: H) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap()
            .entry(key)
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off<Q>(&self, key: &Q, id: ListenerId) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut listeners = self.listeners.write().unwrap();
        let Some(list) = listeners.get_mut(key) else {
            return false;
        };
        let len = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != len;
        if list.is_empty() {
            listeners.remove(key);
        }
        removed
    }

    /// Remove every listener of a key.
    pub fn off_all<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.listeners.write().unwrap().remove(key);
    }

    /// Get a snapshot of the listeners of a key.
    /// The lock is released before returning, so listeners can update the registry.
    pub fn listeners<Q>(&self, key: &Q) -> Vec<H>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.listeners
            .read()
            .unwrap()
            .get(key)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the first listener registered for a key.
    pub fn first<Q>(&self, key: &Q) -> Option<H>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let listeners = self.listeners.read().unwrap();
        listeners.get(key)?.first().map(|(_, h)| h.clone())
    }

    /// Returns true if a key has at least one listener.
    pub fn has_listeners<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.listeners.read().unwrap().contains_key(key)
    }

    /// Remove all the listeners.
    pub fn clear(&self) {
        self.listeners.write().unwrap().clear();
    }
}

impl<K, H> std::fmt::Debug for EventRegistry<K, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.listeners.read().map(|l| l.len()).unwrap_or_default();
        f.debug_struct("EventRegistry").field("keys", &len).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    type Handler = Arc<dyn Fn(u32) -> u32 + Send + Sync>;

    #[test]
    fn listeners_keep_registration_order() {
        let registry = EventRegistry::<String, Handler>::new();
        registry.on("event".into(), Arc::new(|v| v + 1));
        registry.on("event".into(), Arc::new(|v| v * 10));
        let res: Vec<_> = registry
            .listeners("event")
            .into_iter()
            .map(|h| h(2))
            .collect();
        assert_eq!(res, [3, 20]);
        assert!(registry.listeners("other").is_empty());
    }

    #[test]
    fn off_removes_a_single_listener() {
        let registry = EventRegistry::<&'static str, Handler>::new();
        let first = registry.on("event", Arc::new(|v| v));
        registry.on("event", Arc::new(|v| v + 1));
        assert!(registry.off("event", first));
        assert!(!registry.off("event", first));
        assert_eq!(registry.listeners("event").len(), 1);
        assert_eq!(registry.first("event").map(|h| h(1)), Some(2));

        registry.off_all("event");
        assert!(!registry.has_listeners("event"));
    }

    #[test]
    fn listener_can_register_while_called() {
        let registry = Arc::new(EventRegistry::<u8, Arc<dyn Fn() + Send + Sync>>::new());
        let r = registry.clone();
        registry.on(
            0,
            Arc::new(move || {
                r.on(1, Arc::new(|| ()));
            }),
        );
        for h in registry.listeners(&0) {
            h();
        }
        assert!(registry.has_listeners(&1));
    }
}
