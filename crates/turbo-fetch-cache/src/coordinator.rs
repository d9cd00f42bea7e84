//! Single-flight fetch coordination.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::key::CacheKey;
use crate::stats::{CacheStats, StatsRecorder};
use crate::store::{lock_pass, Admission, CacheStore};
use crate::subscriber::{Subscriber, SubscriberId};

/// Updater closure for [`Update::With`].
pub type Updater<T> = Box<dyn FnOnce(Option<&T>) -> T + Send>;

/// New value for an external mutation.
pub enum Update<T> {
    /// Replace the cached value.
    Value(T),
    /// Compute the next value from the current one.
    With(Updater<T>),
}

impl<T> Update<T> {
    /// Replace the cached value.
    pub fn value(value: T) -> Self {
        Self::Value(value)
    }

    /// Compute the next value from the current one.
    pub fn with<F>(f: F) -> Self
    where
        F: FnOnce(Option<&T>) -> T + Send + 'static,
    {
        Self::With(Box::new(f))
    }

    fn apply(self, previous: Option<&T>) -> T {
        match self {
            Self::Value(value) => value,
            Self::With(f) => f(previous),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Update<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::With(_) => f.write_str("With(..)"),
        }
    }
}

struct CacheInner<T, E> {
    config: CacheConfig,
    store: CacheStore<T, E>,
    stats: StatsRecorder,
}

/// Key-addressed fetch cache.
///
/// Guarantees at most one in-flight fetch per key: callers arriving while a
/// fetch runs wait for its outcome instead of starting another. Settled
/// values are cached for the life of the cache and pushed to every
/// registered [`Subscriber`].
///
/// Cloning is cheap and clones share state. Independent caches are created
/// with [`FetchCache::new`].
///
/// # Example
///
/// ```rust,ignore
/// let cache: FetchCache<Product, FetchError> = FetchCache::new(CacheConfig::new("products"));
/// let key = CacheKey::from("product:123");
///
/// let product = cache
///     .resolve(&key, || async { client.get_product("123").await }, false)
///     .await?;
/// ```
pub struct FetchCache<T, E> {
    inner: Arc<CacheInner<T, E>>,
}

impl<T, E> Clone for FetchCache<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Default for FetchCache<T, E> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<T, E> fmt::Debug for FetchCache<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCache")
            .field("config", &self.inner.config)
            .field("store", &self.inner.store)
            .finish()
    }
}

impl<T, E> FetchCache<T, E> {
    /// Create an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                config,
                store: CacheStore::new(),
                stats: StatsRecorder::default(),
            }),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get the underlying store.
    pub fn store(&self) -> &CacheStore<T, E> {
        &self.inner.store
    }

    /// Snapshot the cache counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    fn name(&self) -> &str {
        &self.inner.config.name
    }

    fn log_key<'a>(&self, key: &'a CacheKey) -> &'a str {
        if self.inner.config.log_keys {
            key.as_str()
        } else {
            "<redacted>"
        }
    }
}

impl<T, E> FetchCache<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + fmt::Display + Send + Sync + 'static,
{
    /// Create the entry for `key` if it does not exist yet.
    pub fn ensure_entry(&self, key: &CacheKey) {
        self.inner.store.ensure_entry(key);
    }

    /// Read the cached value without fetching.
    pub fn get_value(&self, key: &CacheKey) -> Option<T> {
        self.inner.store.get_value(key.as_str())
    }

    /// Seed or overwrite the cached value without notifying subscribers.
    pub fn set_value(&self, key: &CacheKey, value: T) {
        self.inner.store.set_value(key, value);
    }

    /// Register a subscriber for `key`.
    pub fn register_subscriber<S>(&self, key: &CacheKey, handle: &Arc<S>) -> SubscriberId
    where
        S: Subscriber<T> + 'static,
    {
        let id = self.inner.store.register_subscriber(key, handle);
        trace!(cache = self.name(), key = self.log_key(key), subscriber = %id, "subscriber registered");
        id
    }

    /// Unregister a subscriber. Unknown keys and stale tokens are ignored.
    pub fn unregister_subscriber(&self, key: &CacheKey, id: SubscriberId) -> bool {
        let removed = self.inner.store.unregister_subscriber(key.as_str(), id);
        trace!(cache = self.name(), key = self.log_key(key), subscriber = %id, removed, "subscriber unregistered");
        removed
    }

    /// Resolve the value for `key`, fetching at most once per key at a time.
    ///
    /// - With `avoid_fetch_if_cached` set and a value cached, that value is
    ///   returned and `fetch` is never called.
    /// - If a fetch for `key` is already in flight, this waits for it and
    ///   returns its outcome; `fetch` is not called.
    /// - Otherwise `fetch` is called once. Its outcome goes to every waiter
    ///   in arrival order, then to every subscriber, then back to the caller.
    ///   On failure the previously cached value is kept and subscribers are
    ///   set to `None`.
    ///
    /// If the future driving a fetch is dropped before it settles, the entry
    /// returns to idle and the waiters retry, one of them leading a new fetch.
    pub async fn resolve<F, Fut>(&self, key: &CacheKey, fetch: F, avoid_fetch_if_cached: bool) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        loop {
            match self.inner.store.admit(key, avoid_fetch_if_cached) {
                Admission::Cached(value) => {
                    self.inner.stats.cache_hit();
                    trace!(cache = self.name(), key = self.log_key(key), "cache hit");
                    return Ok(value);
                }
                Admission::Wait(rx) => {
                    self.inner.stats.deduplicated();
                    trace!(cache = self.name(), key = self.log_key(key), "joined in-flight fetch");
                    match rx.await {
                        Ok(outcome) => return outcome,
                        Err(_) => {
                            debug!(cache = self.name(), key = self.log_key(key), "in-flight fetch abandoned, retrying");
                        }
                    }
                }
                Admission::Lead => return self.lead(key, fetch).await,
            }
        }
    }

    async fn lead<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut guard = FetchGuard {
            cache: self,
            key,
            armed: true,
        };

        self.inner.stats.fetch_started();
        debug!(cache = self.name(), key = self.log_key(key), "fetch started");

        let outcome = fetch().await;
        guard.armed = false;

        // Settling returns the entry to idle before any user code runs, so
        // a panicking subscriber cannot leave the key stuck in flight.
        let pass = self.inner.store.pass(key);
        let _pass = lock_pass(&pass);
        let settlement = self.inner.store.settle(key, &outcome);
        let waiters = settlement.waiters.len();
        let subscribers = settlement.subscribers.len();

        for waiter in settlement.waiters {
            // The receiver is gone if that caller was dropped.
            let _ = waiter.send(outcome.clone());
        }

        let value = outcome.as_ref().ok().cloned();
        for subscriber in &settlement.subscribers {
            subscriber.force_set(value.clone());
        }

        match &outcome {
            Ok(_) => {
                self.inner.stats.fetch_succeeded();
                debug!(cache = self.name(), key = self.log_key(key), waiters, subscribers, "fetch succeeded");
            }
            Err(err) => {
                self.inner.stats.fetch_failed();
                warn!(cache = self.name(), key = self.log_key(key), waiters, subscribers, error = %err, "fetch failed");
            }
        }

        outcome
    }

    /// Replace the cached value for `key` and push it to every subscriber.
    ///
    /// The update and the notification pass form one batch: no other
    /// mutation or settling fetch for `key` interleaves with it. Other keys
    /// are not blocked. Fetch state and waiters are untouched. Returns the
    /// new value.
    ///
    /// The updater, like [`Subscriber::force_set`], must not mutate `key`
    /// again.
    pub fn mutate(&self, key: &CacheKey, update: Update<T>) -> T {
        match self.try_mutate(key, |previous| Ok::<_, std::convert::Infallible>(update.apply(previous))) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`mutate`](Self::mutate), with a fallible updater.
    ///
    /// If the updater fails, its error is returned and neither the cached
    /// value nor any subscriber changes.
    pub fn try_mutate<F, R>(&self, key: &CacheKey, updater: F) -> Result<T, R>
    where
        F: FnOnce(Option<&T>) -> Result<T, R>,
    {
        let pass = self.inner.store.pass(key);
        let _pass = lock_pass(&pass);
        let previous = self.inner.store.get_value(key.as_str());
        let next = updater(previous.as_ref())?;

        let subscribers = self.inner.store.replace(key, next.clone());
        for subscriber in &subscribers {
            subscriber.force_set(Some(next.clone()));
        }

        self.inner.stats.mutation();
        debug!(
            cache = self.name(),
            key = self.log_key(key),
            subscribers = subscribers.len(),
            "cached value mutated"
        );
        Ok(next)
    }

    /// Ask every subscriber of `key` to run its own fetch cycle again.
    ///
    /// Returns the number of subscribers asked. Unknown keys are a no-op.
    pub fn refetch_all(&self, key: &CacheKey) -> usize {
        let subscribers = self.inner.store.subscribers(key.as_str());
        for subscriber in &subscribers {
            subscriber.refetch();
        }

        self.inner.stats.refetch_broadcast();
        debug!(
            cache = self.name(),
            key = self.log_key(key),
            subscribers = subscribers.len(),
            "refetch requested"
        );
        subscribers.len()
    }
}

/// Returns the entry to idle if the leading future is dropped mid-fetch.
struct FetchGuard<'a, T, E> {
    cache: &'a FetchCache<T, E>,
    key: &'a CacheKey,
    armed: bool,
}

impl<T, E> Drop for FetchGuard<'_, T, E> {
    fn drop(&mut self) {
        if self.armed {
            let waiters = self.cache.inner.store.abandon(self.key);
            debug!(
                cache = self.cache.name(),
                key = self.cache.log_key(self.key),
                waiters,
                "fetch abandoned before settling"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::thread;
    use std::time::Duration;

    use futures::future::join_all;
    use futures::FutureExt;
    use serde_json::json;
    use tokio::sync::oneshot;

    use crate::key::{derive_key, Descriptor};

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: u32,
        name: String,
    }

    fn item() -> Item {
        Item {
            id: 1,
            name: "test".to_string(),
        }
    }

    fn cache() -> FetchCache<Item, String> {
        FetchCache::new(CacheConfig::new("test"))
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Option<Item>>>,
        refetches: AtomicUsize,
    }

    impl Subscriber<Item> for Recorder {
        fn force_set(&self, value: Option<Item>) {
            self.seen.lock().unwrap().push(value);
        }

        fn refetch(&self) {
            self.refetches.fetch_add(1, Ordering::SeqCst);
        }
    }

    // === Single-flight Tests ===

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_fetch() {
        let cache = cache();
        let key = CacheKey::from("key");
        let calls = AtomicUsize::new(0);
        let (release, gate) = oneshot::channel::<()>();
        let gate = Mutex::new(Some(gate));
        let (calls, gate) = (&calls, &gate);

        let callers = (0..5).map(|_| {
            cache.resolve(
                &key,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let gate = gate.lock().unwrap().take().unwrap();
                    let _ = gate.await;
                    Ok(item())
                },
                false,
            )
        });

        let all = join_all(callers);
        let releaser = async {
            tokio::task::yield_now().await;
            assert!(cache.store().is_fetching("key"));
            assert_eq!(cache.store().waiter_count("key"), 4);
            release.send(()).unwrap();
        };
        let (results, ()) = tokio::join!(all, releaser);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result, Ok(item()));
        }
        assert!(!cache.store().is_fetching("key"));
        assert_eq!(cache.store().waiter_count("key"), 0);

        let stats = cache.stats();
        assert_eq!(stats.fetches_started, 1);
        assert_eq!(stats.deduplicated, 4);
    }

    #[tokio::test]
    async fn test_concurrent_failure_reaches_every_waiter() {
        let cache = cache();
        let key = CacheKey::from("key");
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let callers = (0..3).map(|_| {
            cache.resolve(
                &key,
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    Err::<Item, _>("upstream down".to_string())
                },
                false,
            )
        });
        let results = join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result, Err("upstream down".to_string()));
        }
        assert!(!cache.store().is_fetching("key"));
    }

    #[tokio::test]
    async fn test_scenario_fetch_join_then_cached() {
        let cache = cache();
        let key = derive_key(&Descriptor::from("key")).unwrap();
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(item())
        };
        let (first, second) = tokio::join!(
            cache.resolve(&key, fetch, false),
            cache.resolve(&key, fetch, false)
        );
        assert_eq!(first, Ok(item()));
        assert_eq!(second, Ok(item()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let third = cache
            .resolve(
                &key,
                || async { Err::<Item, _>("must not fetch".to_string()) },
                true,
            )
            .await;
        assert_eq!(third, Ok(item()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_sequential_resolves_refetch_without_avoid_flag() {
        let cache = cache();
        let key = CacheKey::from("key");
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        for _ in 0..2 {
            cache
                .resolve(
                    &key,
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(item())
                    },
                    false,
                )
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    // === Failure Tests ===

    #[tokio::test]
    async fn test_failure_keeps_previous_value_and_isolates_keys() {
        let cache = cache();
        let a = CacheKey::from("a");
        let b = CacheKey::from("b");
        cache.set_value(&a, item());
        cache.set_value(&b, item());

        let result = cache
            .resolve(&a, || async { Err::<Item, _>("boom".to_string()) }, false)
            .await;

        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(cache.get_value(&a), Some(item()));
        assert_eq!(cache.get_value(&b), Some(item()));
        assert!(!cache.store().is_fetching("a"));
        assert_eq!(cache.stats().fetches_failed, 1);
    }

    #[tokio::test]
    async fn test_retry_after_failure_fetches_again() {
        let cache = cache();
        let key = CacheKey::from("key");

        let _ = cache
            .resolve(&key, || async { Err::<Item, _>("boom".to_string()) }, false)
            .await;
        let result = cache.resolve(&key, || async { Ok(item()) }, false).await;

        assert_eq!(result, Ok(item()));
    }

    #[tokio::test]
    async fn test_subscribers_notified_on_success_and_failure() {
        let cache = cache();
        let key = CacheKey::from("key");
        let sub = Arc::new(Recorder::default());
        cache.register_subscriber(&key, &sub);

        cache.resolve(&key, || async { Ok(item()) }, false).await.unwrap();
        let _ = cache
            .resolve(&key, || async { Err::<Item, _>("boom".to_string()) }, false)
            .await;

        let seen = sub.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![Some(item()), None]);
    }

    // === Cancellation Tests ===

    #[tokio::test]
    async fn test_dropped_leader_hands_fetch_to_waiter() {
        let cache = cache();
        let key = CacheKey::from("key");
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let leader = cache.resolve(
            &key,
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                futures::future::pending::<Result<Item, String>>().await
            },
            false,
        );
        let waiter = cache.resolve(
            &key,
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(item())
            },
            false,
        );

        let mut leader = Box::pin(leader);
        let mut waiter = Box::pin(waiter);
        assert!(futures::poll!(leader.as_mut()).is_pending());
        assert!(futures::poll!(waiter.as_mut()).is_pending());
        assert!(cache.store().is_fetching("key"));

        drop(leader);
        assert!(!cache.store().is_fetching("key"));

        assert_eq!(waiter.await, Ok(item()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get_value(&key), Some(item()));
    }

    // === Mutation Tests ===

    #[test]
    fn test_mutate_with_updater_broadcasts_once() {
        let cache = cache();
        let key = CacheKey::from("key");
        let other = CacheKey::from("other");
        cache.set_value(&key, item());

        let sub = Arc::new(Recorder::default());
        let bystander = Arc::new(Recorder::default());
        cache.register_subscriber(&key, &sub);
        cache.register_subscriber(&other, &bystander);

        let next = cache.mutate(
            &key,
            Update::with(|prev: Option<&Item>| {
                let mut next = prev.cloned().unwrap();
                next.name = "renamed".to_string();
                next
            }),
        );

        assert_eq!(next.name, "renamed");
        assert_eq!(cache.get_value(&key), Some(next.clone()));
        assert_eq!(*sub.seen.lock().unwrap(), vec![Some(next)]);
        assert!(bystander.seen.lock().unwrap().is_empty());
        assert_eq!(cache.stats().mutations, 1);
    }

    #[test]
    fn test_mutate_with_value_creates_entry() {
        let cache = cache();
        let key = CacheKey::from("fresh");

        cache.mutate(&key, Update::value(item()));

        assert_eq!(cache.get_value(&key), Some(item()));
        assert!(!cache.store().is_fetching("fresh"));
    }

    #[test]
    fn test_try_mutate_error_leaves_state_untouched() {
        let cache = cache();
        let key = CacheKey::from("key");
        cache.set_value(&key, item());
        let sub = Arc::new(Recorder::default());
        cache.register_subscriber(&key, &sub);

        let result = cache.try_mutate(&key, |_| Err::<Item, _>("rejected"));

        assert_eq!(result, Err("rejected"));
        assert_eq!(cache.get_value(&key), Some(item()));
        assert!(sub.seen.lock().unwrap().is_empty());
        assert_eq!(cache.stats().mutations, 0);
    }

    // === Refetch Tests ===

    #[test]
    fn test_refetch_all_calls_each_subscriber() {
        let cache = cache();
        let key = CacheKey::from(json!(["user", 1]).to_string());
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        cache.register_subscriber(&key, &a);
        let id_b = cache.register_subscriber(&key, &b);

        assert_eq!(cache.refetch_all(&key), 2);
        cache.unregister_subscriber(&key, id_b);
        assert_eq!(cache.refetch_all(&key), 1);

        assert_eq!(a.refetches.load(Ordering::SeqCst), 2);
        assert_eq!(b.refetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_refetch_all_unknown_key_is_noop() {
        let cache = cache();
        assert_eq!(cache.refetch_all(&CacheKey::from("nothing")), 0);
    }

    // === Ordering Tests ===

    #[tokio::test]
    async fn test_waiters_settle_in_arrival_order() {
        let cache = cache();
        let key = CacheKey::from("key");
        let (release, gate) = oneshot::channel::<()>();

        let leader = {
            let (cache, key) = (cache.clone(), key.clone());
            tokio::spawn(async move {
                let fetch = move || async move {
                    let _ = gate.await;
                    Ok(item())
                };
                cache.resolve(&key, fetch, false).await
            })
        };
        while !cache.store().is_fetching("key") {
            tokio::task::yield_now().await;
        }

        let settled = Arc::new(Mutex::new(Vec::new()));
        let mut waiters = Vec::new();
        for arrival in 0..4usize {
            let (c, k, s) = (cache.clone(), key.clone(), Arc::clone(&settled));
            waiters.push(tokio::spawn(async move {
                let outcome = c
                    .resolve(&k, || async { Err::<Item, _>("waiter fetched".to_string()) }, false)
                    .await;
                s.lock().unwrap().push(arrival);
                outcome
            }));
            while cache.store().waiter_count("key") <= arrival {
                tokio::task::yield_now().await;
            }
        }

        release.send(()).unwrap();
        assert_eq!(leader.await.unwrap(), Ok(item()));
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), Ok(item()));
        }
        assert_eq!(*settled.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    // === Finalization Tests ===

    struct Exploding {
        armed: AtomicBool,
    }

    impl Subscriber<Item> for Exploding {
        fn force_set(&self, _value: Option<Item>) {
            if self.armed.swap(false, Ordering::SeqCst) {
                panic!("subscriber hook failed");
            }
        }

        fn refetch(&self) {}
    }

    #[tokio::test]
    async fn test_panicking_subscriber_still_finalizes() {
        let cache = cache();
        let key = CacheKey::from("key");
        let sub = Arc::new(Exploding {
            armed: AtomicBool::new(true),
        });
        cache.register_subscriber(&key, &sub);
        let (release, gate) = oneshot::channel::<()>();

        let leader = cache.resolve(
            &key,
            move || async move {
                let _ = gate.await;
                Ok(item())
            },
            false,
        );
        let waiter = cache.resolve(&key, || async { Err::<Item, _>("waiter fetched".to_string()) }, false);

        let mut leader = Box::pin(AssertUnwindSafe(leader).catch_unwind());
        let mut waiter = Box::pin(waiter);
        assert!(futures::poll!(leader.as_mut()).is_pending());
        assert!(futures::poll!(waiter.as_mut()).is_pending());
        assert_eq!(cache.store().waiter_count("key"), 1);

        release.send(()).unwrap();
        assert!(leader.await.is_err());

        assert!(!cache.store().is_fetching("key"));
        assert_eq!(cache.store().waiter_count("key"), 0);
        assert_eq!(cache.get_value(&key), Some(item()));
        assert_eq!(waiter.await, Ok(item()));

        let retried = cache
            .resolve(
                &key,
                || async {
                    Ok(Item {
                        id: 2,
                        name: "retry".to_string(),
                    })
                },
                false,
            )
            .await;
        assert_eq!(retried.map(|i| i.id), Ok(2));
    }

    // === Re-entrancy Tests ===

    /// Keeps a second key in sync with the one it is subscribed to.
    struct Deriving {
        cache: FetchCache<Item, String>,
        derived: CacheKey,
    }

    impl Subscriber<Item> for Deriving {
        fn force_set(&self, value: Option<Item>) {
            if let Some(base) = value {
                self.cache.mutate(
                    &self.derived,
                    Update::value(Item {
                        id: base.id * 2,
                        name: format!("{}-derived", base.name),
                    }),
                );
            }
        }

        fn refetch(&self) {}
    }

    #[test]
    fn test_subscriber_may_mutate_another_key() {
        let cache = cache();
        let base = CacheKey::from("base");
        let derived = CacheKey::from("derived");
        let deriving = Arc::new(Deriving {
            cache: cache.clone(),
            derived: derived.clone(),
        });
        let watcher = Arc::new(Recorder::default());
        cache.register_subscriber(&base, &deriving);
        cache.register_subscriber(&derived, &watcher);

        let (done, finished) = mpsc::channel();
        let worker = {
            let (cache, base) = (cache.clone(), base.clone());
            thread::spawn(move || {
                cache.mutate(&base, Update::value(item()));
                let _ = done.send(());
            })
        };
        finished
            .recv_timeout(Duration::from_secs(5))
            .expect("mutation of the base key did not complete");
        worker.join().unwrap();

        let expected = Item {
            id: 2,
            name: "test-derived".to_string(),
        };
        assert_eq!(cache.get_value(&derived), Some(expected.clone()));
        assert_eq!(*watcher.seen.lock().unwrap(), vec![Some(expected)]);
    }

    #[tokio::test]
    async fn test_settling_fetch_may_mutate_another_key() {
        let cache = cache();
        let base = CacheKey::from("base");
        let derived = CacheKey::from("derived");
        let deriving = Arc::new(Deriving {
            cache: cache.clone(),
            derived: derived.clone(),
        });
        cache.register_subscriber(&base, &deriving);

        let fetched = tokio::time::timeout(
            Duration::from_secs(5),
            cache.resolve(
                &base,
                || async {
                    Ok(Item {
                        id: 5,
                        name: "fetched".to_string(),
                    })
                },
                false,
            ),
        )
        .await
        .expect("fetch did not settle");

        assert_eq!(fetched.map(|i| i.id), Ok(5));
        assert_eq!(cache.get_value(&derived).map(|i| i.id), Some(10));
    }
}
