//! Typed publish/subscribe with per-key listener sets
//!
//! Listeners run synchronously, in registration order, on the emitting
//! thread. A listener that returns an error or panics is logged and skipped;
//! the failure never reaches the emitter or sibling listeners.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, warn};

/// Listener callback type
pub type Listener<E> = Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to deregister
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle<K> {
    key: K,
    id: u64,
}

impl<K> ListenerHandle<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

struct Entry<E> {
    id: u64,
    once: bool,
    callback: Listener<E>,
}

impl<E> Clone for Entry<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            once: self.once,
            callback: Arc::clone(&self.callback),
        }
    }
}

struct Registry<K, E> {
    listeners: HashMap<K, Vec<Entry<E>>>,
    max_listeners: Option<usize>,
    warned: HashSet<K>,
}

/// Event bus keyed by `K`, delivering `&E` payloads
pub struct EventBus<K, E> {
    registry: Mutex<Registry<K, E>>,
    next_id: AtomicU64,
}

impl<K, E> EventBus<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Create a bus with no listener cap
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                listeners: HashMap::new(),
                max_listeners: None,
                warned: HashSet::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Set the soft cap used for leak warnings. Registration is never refused.
    pub fn set_max_listeners(&self, max: Option<usize>) {
        let mut registry = self.lock();
        registry.max_listeners = max;
        registry.warned.clear();
    }

    pub fn max_listeners(&self) -> Option<usize> {
        self.lock().max_listeners
    }

    /// Register a listener for `key`
    pub fn on<F>(&self, key: K, listener: F) -> ListenerHandle<K>
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_listener(key, Arc::new(listener), false)
    }

    /// Register a listener that is removed after its first invocation
    pub fn once<F>(&self, key: K, listener: F) -> ListenerHandle<K>
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_listener(key, Arc::new(listener), true)
    }

    /// Deregister a listener. Returns false if it was already gone.
    pub fn off(&self, handle: &ListenerHandle<K>) -> bool {
        let mut registry = self.lock();
        let Some(entries) = registry.listeners.get_mut(&handle.key) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != handle.id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            registry.listeners.remove(&handle.key);
        }
        removed
    }

    /// Invoke every current listener for `key` in registration order.
    ///
    /// Returns whether any listener was registered.
    pub fn emit(&self, key: &K, event: &E) -> bool {
        // Snapshot under the lock, invoke outside it so listeners may
        // subscribe, unsubscribe or emit re-entrantly.
        let snapshot = {
            let mut registry = self.lock();
            let Some(entries) = registry.listeners.get_mut(key) else {
                return false;
            };
            let snapshot = entries.clone();
            entries.retain(|entry| !entry.once);
            if entries.is_empty() {
                registry.listeners.remove(key);
            }
            snapshot
        };

        if snapshot.is_empty() {
            return false;
        }

        for entry in &snapshot {
            // Skip listeners removed by an earlier listener in this emission;
            // once-entries left the registry with the snapshot.
            if !entry.once && !self.is_registered(key, entry.id) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| (entry.callback)(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(key = ?key, listener = entry.id, error = %err, "Listener failed");
                }
                Err(panic) => {
                    error!(
                        key = ?key,
                        listener = entry.id,
                        panic = %panic_message(&*panic),
                        "Listener panicked"
                    );
                }
            }
        }
        true
    }

    fn is_registered(&self, key: &K, id: u64) -> bool {
        self.lock()
            .listeners
            .get(key)
            .is_some_and(|entries| entries.iter().any(|entry| entry.id == id))
    }

    /// Clear listeners for one key, or for every key when `None`
    pub fn remove_all_listeners(&self, key: Option<&K>) {
        let mut registry = self.lock();
        match key {
            Some(key) => {
                registry.listeners.remove(key);
                registry.warned.remove(key);
            }
            None => {
                registry.listeners.clear();
                registry.warned.clear();
            }
        }
    }

    /// Number of listeners registered for `key`
    pub fn listener_count(&self, key: &K) -> usize {
        self.lock().listeners.get(key).map_or(0, Vec::len)
    }

    /// Number of listeners across all keys
    pub fn total_listener_count(&self) -> usize {
        self.lock().listeners.values().map(Vec::len).sum()
    }

    /// Keys that currently have listeners
    pub fn keys(&self) -> Vec<K> {
        self.lock().listeners.keys().cloned().collect()
    }

    /// Register an already-boxed listener
    pub fn add_listener(&self, key: K, callback: Listener<E>, once: bool) -> ListenerHandle<K> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.lock();
        let max = registry.max_listeners;
        let entries = registry.listeners.entry(key.clone()).or_default();
        entries.push(Entry { id, once, callback });
        let count = entries.len();

        if let Some(max) = max {
            if count > max && registry.warned.insert(key.clone()) {
                warn!(
                    key = ?key,
                    count,
                    max,
                    "Possible listener leak: more listeners than the configured soft cap"
                );
            }
        }

        ListenerHandle { key, id }
    }

    fn lock(&self) -> MutexGuard<'_, Registry<K, E>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, E> Default for EventBus<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, E> fmt::Debug for EventBus<K, E>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock();
        f.debug_struct("EventBus")
            .field("keys", &registry.listeners.len())
            .field("max_listeners", &registry.max_listeners)
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, EventBus<&'static str, u32>) {
        (Arc::new(Mutex::new(Vec::new())), EventBus::new())
    }

    #[test]
    fn test_emit_in_registration_order() {
        let (log, bus) = recorder();
        for name in ["a", "b", "c"] {
            let log = log.clone();
            bus.on("tick", move |_| {
                log.lock().unwrap().push(name);
                Ok(())
            });
        }

        assert!(bus.emit(&"tick", &1));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert!(!bus.emit(&"other", &1));
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let bus: EventBus<&str, u32> = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.once("ready", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(bus.listener_count(&"ready"), 1);
        assert!(bus.emit(&"ready", &0));
        assert!(!bus.emit(&"ready", &0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(&"ready"), 0);
    }

    #[test]
    fn test_once_runs_before_later_listeners() {
        let (log, bus) = recorder();
        let first = log.clone();
        bus.once("x", move |_| {
            first.lock().unwrap().push("once");
            Ok(())
        });
        let second = log.clone();
        bus.on("x", move |_| {
            second.lock().unwrap().push("on");
            Ok(())
        });

        bus.emit(&"x", &0);
        bus.emit(&"x", &0);
        assert_eq!(*log.lock().unwrap(), vec!["once", "on", "on"]);
    }

    #[test]
    fn test_failing_listener_is_isolated() {
        let (log, bus) = recorder();
        bus.on("error", |_| anyhow::bail!("subscriber bug"));
        bus.on("error", |_| panic!("subscriber panic"));
        let tail = log.clone();
        bus.on("error", move |_| {
            tail.lock().unwrap().push("after");
            Ok(())
        });

        assert!(bus.emit(&"error", &7));
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
        assert_eq!(bus.listener_count(&"error"), 3);
    }

    #[test]
    fn test_off_and_remove_all() {
        let bus: EventBus<&str, u32> = EventBus::new();
        let handle = bus.on("a", |_| Ok(()));
        bus.on("a", |_| Ok(()));
        bus.on("b", |_| Ok(()));

        assert!(bus.off(&handle));
        assert!(!bus.off(&handle));
        assert_eq!(bus.listener_count(&"a"), 1);

        bus.remove_all_listeners(Some(&"a"));
        assert_eq!(bus.listener_count(&"a"), 0);
        assert_eq!(bus.total_listener_count(), 1);

        bus.remove_all_listeners(None);
        assert_eq!(bus.total_listener_count(), 0);
    }

    #[test]
    fn test_soft_cap_never_rejects() {
        let bus: EventBus<&str, u32> = EventBus::new();
        bus.set_max_listeners(Some(2));
        for _ in 0..5 {
            bus.on("busy", |_| Ok(()));
        }
        assert_eq!(bus.listener_count(&"busy"), 5);
        assert_eq!(bus.max_listeners(), Some(2));
    }

    #[test]
    fn test_reentrant_subscription_during_emit() {
        let bus: Arc<EventBus<&'static str, u32>> = Arc::new(EventBus::new());
        let inner = bus.clone();
        bus.on("outer", move |_| {
            inner.on("late", |_| Ok(()));
            Ok(())
        });

        bus.emit(&"outer", &0);
        assert_eq!(bus.listener_count(&"late"), 1);
    }

    #[test]
    fn test_listener_removed_mid_emit_is_skipped() {
        let (log, bus) = recorder();
        let bus = Arc::new(bus);
        let victim: Arc<Mutex<Option<ListenerHandle<&'static str>>>> =
            Arc::new(Mutex::new(None));

        let (first, inner, target) = (log.clone(), bus.clone(), victim.clone());
        bus.on("tick", move |_| {
            first.lock().unwrap().push("first");
            if let Some(handle) = target.lock().unwrap().take() {
                inner.off(&handle);
            }
            Ok(())
        });
        let second = log.clone();
        let handle = bus.on("tick", move |_| {
            second.lock().unwrap().push("second");
            Ok(())
        });
        *victim.lock().unwrap() = Some(handle);

        assert!(bus.emit(&"tick", &0));
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
        assert_eq!(bus.listener_count(&"tick"), 1);
    }
}
