use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;

use crate::path::{value_at, InternedPath, Path, PathInterner};

/// Called with `(new, old)`; whole-store listeners receive whole states,
/// path listeners receive the values at their path (`null` when absent).
pub type StoreListener = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

struct PathListener {
    id: u64,
    path: InternedPath,
    listener: StoreListener,
}

struct StoreInner {
    state: Value,
    next_id: u64,
    listeners: Vec<(u64, StoreListener)>,
    path_listeners: Vec<PathListener>,
}

impl StoreInner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove(&mut self, id: u64) {
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.path_listeners.retain(|listener| listener.id != id);
    }
}

/// In-memory holder of one JSON document with whole-state and path-scoped
/// change notification.
#[derive(Clone)]
pub struct ObservableStore {
    inner: Arc<Mutex<StoreInner>>,
    interner: Arc<PathInterner>,
}

impl fmt::Debug for ObservableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableStore")
            .field("state", &self.get_state())
            .finish_non_exhaustive()
    }
}

impl Default for ObservableStore {
    fn default() -> Self {
        Self::new(Value::Null)
    }
}

impl ObservableStore {
    #[must_use]
    pub fn new(initial: Value) -> Self {
        Self::with_interner(initial, Arc::new(PathInterner::new()))
    }

    #[must_use]
    pub fn with_interner(initial: Value, interner: Arc<PathInterner>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                state: initial,
                next_id: 0,
                listeners: Vec::new(),
                path_listeners: Vec::new(),
            })),
            interner,
        }
    }

    #[must_use]
    pub fn get_state(&self) -> Value {
        self.lock().state.clone()
    }

    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Value> {
        value_at(&self.lock().state, path).cloned()
    }

    /// Replaces the whole state. Returns `false`, without notifying anyone,
    /// when `next` is deep-equal to the current state.
    pub fn set_state(&self, next: Value) -> bool {
        let (previous, listeners, path_listeners) = {
            let mut inner = self.lock();
            if inner.state == next {
                return false;
            }
            let previous = std::mem::replace(&mut inner.state, next.clone());
            let listeners = inner
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect::<Vec<_>>();
            let path_listeners = inner
                .path_listeners
                .iter()
                .map(|entry| (entry.path.clone(), Arc::clone(&entry.listener)))
                .collect::<Vec<_>>();
            (previous, listeners, path_listeners)
        };

        for listener in &listeners {
            listener(&next, &previous);
        }

        let mut computed: HashMap<InternedPath, Option<(Value, Value)>> = HashMap::new();
        for (path, listener) in &path_listeners {
            let change = computed.entry(path.clone()).or_insert_with(|| {
                let old = value_at(&previous, path.path()).cloned().unwrap_or(Value::Null);
                let new = value_at(&next, path.path()).cloned().unwrap_or(Value::Null);
                (old != new).then_some((new, old))
            });
            if let Some((new, old)) = change.as_ref() {
                listener(new, old);
            }
        }

        true
    }

    pub fn set(&self, value: Value) -> bool {
        self.set_state(value)
    }

    pub fn update(&self, updater: impl FnOnce(&Value) -> Value) -> bool {
        let current = self.get_state();
        self.set_state(updater(&current))
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&Value, &Value) + Send + Sync + 'static,
    ) -> Subscription {
        let mut inner = self.lock();
        let id = inner.next_id();
        inner.listeners.push((id, Arc::new(listener)));
        Subscription::new(id, Arc::downgrade(&self.inner))
    }

    pub fn subscribe_for_path(
        &self,
        path: &Path,
        listener: impl Fn(&Value, &Value) + Send + Sync + 'static,
    ) -> Subscription {
        let path = self.interner.canonicalize(path);
        let mut inner = self.lock();
        let id = inner.next_id();
        inner.path_listeners.push(PathListener {
            id,
            path,
            listener: Arc::new(listener),
        });
        Subscription::new(id, Arc::downgrade(&self.inner))
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        let inner = self.lock();
        inner.listeners.len() + inner.path_listeners.len()
    }

    #[must_use]
    pub fn interner(&self) -> &Arc<PathInterner> {
        &self.interner
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle returned by every `subscribe*` call. Unsubscribing is idempotent,
/// and dropping the handle unsubscribes.
#[must_use]
pub struct Subscription {
    id: u64,
    store: Weak<Mutex<StoreInner>>,
    active: AtomicBool,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    fn new(id: u64, store: Weak<Mutex<StoreInner>>) -> Self {
        Self {
            id,
            store,
            active: AtomicBool::new(true),
        }
    }

    /// Returns `true` only for the call that actually removed the listener.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(store) = self.store.upgrade() {
            store
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(self.id);
        }
        true
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
