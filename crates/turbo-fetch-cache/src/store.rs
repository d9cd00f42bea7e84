//! Per-key cache entries.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::oneshot;

use crate::key::CacheKey;
use crate::subscriber::{Registration, Subscriber, SubscriberId};

/// Sending half of a queued waiter.
pub(crate) type Waiter<T, E> = oneshot::Sender<Result<T, E>>;

/// State held for one derived key.
struct CacheEntry<T, E> {
    /// Last successfully resolved (or seeded/mutated) value.
    cached_value: Option<T>,
    /// True strictly while one fetch is in flight.
    is_fetching: bool,
    /// Callers queued behind the in-flight fetch, in arrival order.
    waiters: Vec<Waiter<T, E>>,
    /// Registered bindings, in registration order.
    subscribers: Vec<Registration<T>>,
    /// Serializes notification passes for this key against each other and
    /// against unregistration.
    pass: Arc<Mutex<()>>,
}

impl<T, E> Default for CacheEntry<T, E> {
    fn default() -> Self {
        Self {
            cached_value: None,
            is_fetching: false,
            waiters: Vec::new(),
            subscribers: Vec::new(),
            pass: Arc::new(Mutex::new(())),
        }
    }
}

impl<T: 'static, E> CacheEntry<T, E> {
    /// Upgrade every registration, dropping those whose owner is gone.
    fn live_subscribers(&mut self) -> Vec<Arc<dyn Subscriber<T>>> {
        let mut live = Vec::with_capacity(self.subscribers.len());
        self.subscribers.retain(|registration| match registration.upgrade() {
            Some(handle) => {
                live.push(handle);
                true
            }
            None => false,
        });
        live
    }
}

/// Outcome of asking to resolve a key.
pub(crate) enum Admission<T, E> {
    /// A cached value may be returned without fetching.
    Cached(T),
    /// A fetch is already in flight; await its outcome.
    Wait(oneshot::Receiver<Result<T, E>>),
    /// The caller now owns the fetch for this key.
    Lead,
}

/// Waiters and subscribers to deliver a settled fetch to.
pub(crate) struct Settlement<T, E> {
    pub(crate) waiters: Vec<Waiter<T, E>>,
    pub(crate) subscribers: Vec<Arc<dyn Subscriber<T>>>,
}

/// Mapping from derived key to cache entry.
///
/// Entries are created lazily and live as long as the store. All state is
/// behind one lock; user code (fetchers, updaters, subscriber hooks) never
/// runs while it is held. Each entry also carries a pass lock that
/// serializes notification passes for its key against each other and
/// against unregistration, so a subscriber is never notified after
/// [`unregister_subscriber`](Self::unregister_subscriber) has returned.
/// Passes on different keys do not block each other.
pub struct CacheStore<T, E> {
    entries: Mutex<HashMap<CacheKey, CacheEntry<T, E>>>,
    next_subscriber: AtomicU64,
}

impl<T, E> Default for CacheStore<T, E> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(0),
        }
    }
}

impl<T, E> fmt::Debug for CacheStore<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.len())
            .finish()
    }
}

impl<T, E> CacheStore<T, E> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // Entry state is consistent after every critical section, so a
    // poisoned lock is still safe to use.
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry<T, E>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pass lock for `key`, creating the entry if needed.
    ///
    /// Always taken before the entries lock, never while holding it.
    pub(crate) fn pass(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        Arc::clone(&self.lock_entries().entry(key.clone()).or_default().pass)
    }

    /// Create the entry for `key` if it does not exist yet.
    pub fn ensure_entry(&self, key: &CacheKey) {
        self.lock_entries().entry(key.clone()).or_default();
    }

    /// Whether an entry exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.lock_entries().contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether the store has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a fetch is in flight for `key`.
    pub fn is_fetching(&self, key: &str) -> bool {
        self.lock_entries()
            .get(key)
            .map(|e| e.is_fetching)
            .unwrap_or(false)
    }

    /// Number of callers waiting on the in-flight fetch for `key`.
    pub fn waiter_count(&self, key: &str) -> usize {
        self.lock_entries()
            .get(key)
            .map(|e| e.waiters.len())
            .unwrap_or(0)
    }

    /// Number of subscribers registered for `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.lock_entries()
            .get(key)
            .map(|e| e.subscribers.len())
            .unwrap_or(0)
    }

    /// Remove the subscriber registered under `id`.
    ///
    /// Returns `false` if there was nothing to remove: unknown key, or a
    /// token that was already unregistered.
    pub fn unregister_subscriber(&self, key: &str, id: SubscriberId) -> bool {
        let Some(pass) = self.lock_entries().get(key).map(|e| Arc::clone(&e.pass)) else {
            return false;
        };
        let _pass = lock_pass(&pass);
        let mut entries = self.lock_entries();
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        let before = entry.subscribers.len();
        entry.subscribers.retain(|r| r.id != id);
        entry.subscribers.len() != before
    }

    /// Abandon an in-flight fetch whose owner went away before it settled.
    ///
    /// Queued waiters are dropped, which wakes them with a cancellation so
    /// they can retry.
    pub(crate) fn abandon(&self, key: &CacheKey) -> usize {
        let mut entries = self.lock_entries();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.is_fetching = false;
                std::mem::take(&mut entry.waiters).len()
            }
            None => 0,
        }
    }
}

/// Lock a pass lock, recovering it if a subscriber panicked mid-pass.
pub(crate) fn lock_pass(pass: &Mutex<()>) -> MutexGuard<'_, ()> {
    pass.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Clone + 'static, E> CacheStore<T, E> {
    /// Read the cached value without fetching.
    pub fn get_value(&self, key: &str) -> Option<T> {
        self.lock_entries()
            .get(key)
            .and_then(|e| e.cached_value.clone())
    }

    /// Overwrite the cached value, creating the entry if needed.
    ///
    /// Subscribers are not notified; see [`FetchCache::mutate`](crate::FetchCache::mutate).
    pub fn set_value(&self, key: &CacheKey, value: T) {
        self.lock_entries()
            .entry(key.clone())
            .or_default()
            .cached_value = Some(value);
    }

    /// Register a subscriber for `key`.
    ///
    /// Only a weak reference is kept; the returned token is needed to
    /// unregister.
    pub fn register_subscriber<S>(&self, key: &CacheKey, handle: &Arc<S>) -> SubscriberId
    where
        S: Subscriber<T> + 'static,
    {
        let id = SubscriberId::new(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        self.lock_entries()
            .entry(key.clone())
            .or_default()
            .subscribers
            .push(Registration::new(id, handle));
        id
    }

    /// Live subscriber handles for `key`, in registration order.
    pub(crate) fn subscribers(&self, key: &str) -> Vec<Arc<dyn Subscriber<T>>> {
        self.lock_entries()
            .get_mut(key)
            .map(CacheEntry::live_subscribers)
            .unwrap_or_default()
    }

    /// Decide how a resolve for `key` proceeds.
    ///
    /// Checking the cache, joining the waiter queue and claiming the fetch
    /// happen under one lock, so at most one caller is ever told to lead.
    pub(crate) fn admit(&self, key: &CacheKey, avoid_fetch_if_cached: bool) -> Admission<T, E> {
        let mut entries = self.lock_entries();
        let entry = entries.entry(key.clone()).or_default();

        if avoid_fetch_if_cached {
            if let Some(value) = &entry.cached_value {
                return Admission::Cached(value.clone());
            }
        }

        if entry.is_fetching {
            let (tx, rx) = oneshot::channel();
            entry.waiters.push(tx);
            return Admission::Wait(rx);
        }

        entry.is_fetching = true;
        Admission::Lead
    }

    /// Record the outcome of the in-flight fetch for `key`.
    ///
    /// Stores the value on success (a failure keeps the previous one),
    /// returns the entry to idle and hands back everyone to notify.
    pub(crate) fn settle(&self, key: &CacheKey, outcome: &Result<T, E>) -> Settlement<T, E> {
        let mut entries = self.lock_entries();
        let entry = entries.entry(key.clone()).or_default();

        if let Ok(value) = outcome {
            entry.cached_value = Some(value.clone());
        }
        entry.is_fetching = false;

        Settlement {
            waiters: std::mem::take(&mut entry.waiters),
            subscribers: entry.live_subscribers(),
        }
    }

    /// Replace the cached value for `key` and return the subscribers to
    /// notify.
    pub(crate) fn replace(&self, key: &CacheKey, value: T) -> Vec<Arc<dyn Subscriber<T>>> {
        let mut entries = self.lock_entries();
        let entry = entries.entry(key.clone()).or_default();
        entry.cached_value = Some(value);
        entry.live_subscribers()
    }
}
