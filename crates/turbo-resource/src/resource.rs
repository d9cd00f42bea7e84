//! Cached resources bound to a fetch cache.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use turbo_fetch_cache::{
    derive_key, key_for_value, CacheKey, Descriptor, FetchCache, Subscriber, SubscriberId,
};

/// Extra context handed to a resource fetcher.
#[derive(Debug, Clone)]
pub struct FetchInfo<T> {
    /// Whether this load was an explicit refetch.
    pub refetching: bool,
    /// The value the resource held before this load.
    pub previous: Option<T>,
}

/// Fetches the value for a resource.
///
/// Implemented for any `Fn(Value, FetchInfo<T>) -> impl Future` closure;
/// implement it directly for fetchers that carry their own client.
#[async_trait]
pub trait ResourceFetcher<T, E>: Send + Sync + 'static {
    /// Fetch the value for the resolved descriptor `source`.
    async fn fetch(&self, source: Value, info: FetchInfo<T>) -> Result<T, E>;
}

#[async_trait]
impl<T, E, F, Fut> ResourceFetcher<T, E> for F
where
    F: Fn(Value, FetchInfo<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    async fn fetch(&self, source: Value, info: FetchInfo<T>) -> Result<T, E> {
        (self)(source, info).await
    }
}

/// Options for a cached resource.
#[derive(Debug, Clone)]
pub struct ResourceOptions<T> {
    /// Value seeded into the cache on first load when nothing is cached yet.
    pub initial_value: Option<T>,
    /// Whether the first load fetches even when a value is cached.
    /// Falls back to the cache's configured default.
    pub refetch_on_mount: Option<bool>,
}

impl<T> Default for ResourceOptions<T> {
    fn default() -> Self {
        Self {
            initial_value: None,
            refetch_on_mount: None,
        }
    }
}

impl<T> ResourceOptions<T> {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial value.
    pub fn with_initial_value(mut self, value: T) -> Self {
        self.initial_value = Some(value);
        self
    }

    /// Set refetch-on-mount behavior.
    pub fn with_refetch_on_mount(mut self, enabled: bool) -> Self {
        self.refetch_on_mount = Some(enabled);
        self
    }
}

/// Observable state of a resource.
#[derive(Debug, Clone)]
pub struct ResourceState<T, E> {
    /// Current bound value.
    pub value: Option<T>,
    /// Failure from the most recent load, cleared by the next success.
    pub error: Option<E>,
    /// Whether a load is in progress.
    pub loading: bool,
}

struct ResourceInner<T, E> {
    cache: FetchCache<T, E>,
    descriptor: Descriptor,
    fetcher: Arc<dyn ResourceFetcher<T, E>>,
    initial_value: Option<T>,
    refetch_on_mount: bool,
    state: Mutex<ResourceState<T, E>>,
    binding: Mutex<Option<(CacheKey, SubscriberId)>>,
    detached: AtomicBool,
    this: Weak<ResourceInner<T, E>>,
}

impl<T, E> ResourceInner<T, E> {
    fn lock_state(&self) -> MutexGuard<'_, ResourceState<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_binding(&self) -> MutexGuard<'_, Option<(CacheKey, SubscriberId)>> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unbind(&self) {
        if let Some((key, id)) = self.lock_binding().take() {
            self.cache.store().unregister_subscriber(key.as_str(), id);
        }
    }
}

impl<T, E> ResourceInner<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + fmt::Display + Send + Sync + 'static,
{
    /// Move the subscriber registration to `key`, or drop it for "no key".
    fn rebind(&self, key: Option<&CacheKey>) {
        let mut binding = self.lock_binding();
        // Drop marks the resource detached before it unbinds, so checking
        // under the binding lock keeps a late load from registering again.
        if self.detached.load(Ordering::Acquire) {
            return;
        }
        if binding.as_ref().map(|(k, _)| k) == key {
            return;
        }

        if let Some((old, id)) = binding.take() {
            self.cache.unregister_subscriber(&old, id);
        }
        if let (Some(key), Some(this)) = (key, self.this.upgrade()) {
            let id = self.cache.register_subscriber(key, &this);
            *binding = Some((key.clone(), id));
        }
    }

    /// Run one fetch cycle.
    async fn load(&self, refetching: bool) -> Result<Option<T>, E> {
        if self.detached.load(Ordering::Acquire) {
            return Ok(self.lock_state().value.clone());
        }

        let resolved = self
            .descriptor
            .resolve()
            .and_then(|source| key_for_value(&source).map(|key| (source, key)));
        let Some((source, key)) = resolved else {
            self.rebind(None);
            return Ok(self.lock_state().value.clone());
        };

        self.rebind(Some(&key));
        self.cache.ensure_entry(&key);

        if let Some(initial) = &self.initial_value {
            if !refetching && self.cache.get_value(&key).is_none() {
                debug!(cache = %self.cache.config().name, "seeding initial value");
                self.cache.set_value(&key, initial.clone());
                let mut state = self.lock_state();
                state.value = Some(initial.clone());
                state.error = None;
                return Ok(Some(initial.clone()));
            }
        }

        let previous = {
            let mut state = self.lock_state();
            state.loading = true;
            state.value.clone()
        };
        let info = FetchInfo {
            refetching,
            previous,
        };
        let fetcher = Arc::clone(&self.fetcher);
        let avoid_fetch_if_cached = !refetching && !self.refetch_on_mount;

        let outcome = self
            .cache
            .resolve(
                &key,
                move || async move { fetcher.fetch(source, info).await },
                avoid_fetch_if_cached,
            )
            .await;

        let mut state = self.lock_state();
        state.loading = false;
        match &outcome {
            Ok(value) => {
                state.value = Some(value.clone());
                state.error = None;
            }
            Err(err) => state.error = Some(err.clone()),
        }
        outcome.map(Some)
    }
}

impl<T, E> Subscriber<T> for ResourceInner<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + fmt::Display + Send + Sync + 'static,
{
    fn force_set(&self, value: Option<T>) {
        self.lock_state().value = value;
    }

    fn refetch(&self) {
        if self.detached.load(Ordering::Acquire) {
            return;
        }
        let Some(this) = self.this.upgrade() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    // Failures are recorded on the resource state.
                    let _ = this.load(true).await;
                });
            }
            Err(_) => warn!(
                cache = %self.cache.config().name,
                "refetch requested outside a tokio runtime, ignoring"
            ),
        }
    }
}

/// A cached fetch bound to a descriptor.
///
/// The resource registers itself as a subscriber of its key, so fetches
/// settled by other bindings, [`mutate_cached_value`](crate::mutate_cached_value)
/// and [`refetch_resource_for_key`](crate::refetch_resource_for_key) all
/// reach it. Dropping the resource unregisters it.
///
/// # Example
///
/// ```rust,ignore
/// let user = create_cached_resource(
///     &cache,
///     Descriptor::literal(json!(["user", user_id])),
///     |source, _info| async move { api.load_user(&source).await },
///     ResourceOptions::new(),
/// )
/// .await;
///
/// if let Some(user) = user.value() {
///     render(user);
/// }
/// ```
pub struct CachedResource<T, E> {
    inner: Arc<ResourceInner<T, E>>,
}

impl<T, E> CachedResource<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + fmt::Display + Send + Sync + 'static,
{
    /// Bind a resource without loading it.
    ///
    /// The bound value starts as whatever is cached for the key.
    pub fn new<D, F, Fut>(
        cache: &FetchCache<T, E>,
        descriptor: D,
        fetcher: F,
        options: ResourceOptions<T>,
    ) -> Self
    where
        D: Into<Descriptor>,
        F: Fn(Value, FetchInfo<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::with_fetcher(cache, descriptor, fetcher, options)
    }

    /// Bind a resource that fetches through a [`ResourceFetcher`].
    pub fn with_fetcher<D, Fe>(
        cache: &FetchCache<T, E>,
        descriptor: D,
        fetcher: Fe,
        options: ResourceOptions<T>,
    ) -> Self
    where
        D: Into<Descriptor>,
        Fe: ResourceFetcher<T, E>,
    {
        let descriptor = descriptor.into();
        let key = derive_key(&descriptor);
        let refetch_on_mount = options
            .refetch_on_mount
            .unwrap_or(cache.config().refetch_on_mount);

        let inner = Arc::new_cyclic(|this| ResourceInner {
            cache: cache.clone(),
            descriptor,
            fetcher: Arc::new(fetcher),
            initial_value: options.initial_value,
            refetch_on_mount,
            state: Mutex::new(ResourceState {
                value: key.as_ref().and_then(|k| cache.get_value(k)),
                error: None,
                loading: false,
            }),
            binding: Mutex::new(None),
            detached: AtomicBool::new(false),
            this: this.clone(),
        });
        inner.rebind(key.as_ref());

        Self { inner }
    }

    /// Run the initial (mount) fetch cycle.
    pub async fn load(&self) -> Result<Option<T>, E> {
        self.inner.load(false).await
    }

    /// Fetch again, bypassing any cached value.
    pub async fn refetch(&self) -> Result<Option<T>, E> {
        self.inner.load(true).await
    }

    /// Overwrite this resource's value only. The cache is not touched.
    pub fn mutate(&self, value: Option<T>) {
        self.inner.force_set(value);
    }

    /// Current bound value.
    pub fn value(&self) -> Option<T> {
        self.inner.lock_state().value.clone()
    }

    /// Failure from the most recent load.
    pub fn error(&self) -> Option<E> {
        self.inner.lock_state().error.clone()
    }

    /// Whether a load is in progress.
    pub fn loading(&self) -> bool {
        self.inner.lock_state().loading
    }

    /// Consistent snapshot of value, error and loading flag.
    pub fn state(&self) -> ResourceState<T, E> {
        self.inner.lock_state().clone()
    }

    /// Key this resource is currently registered under.
    pub fn key(&self) -> Option<CacheKey> {
        self.inner.lock_binding().as_ref().map(|(k, _)| k.clone())
    }
}

impl<T, E> Drop for CachedResource<T, E> {
    fn drop(&mut self) {
        self.inner.detached.store(true, Ordering::Release);
        self.inner.unbind();
    }
}

impl<T: fmt::Debug, E: fmt::Debug> fmt::Debug for CachedResource<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedResource")
            .field("descriptor", &self.inner.descriptor)
            .field("state", &*self.inner.lock_state())
            .finish()
    }
}

/// Bind a resource to `descriptor` and run its first load.
///
/// A failed first load is not returned here: it is recorded on the
/// resource and visible through [`CachedResource::error`].
pub async fn create_cached_resource<T, E, D, F, Fut>(
    cache: &FetchCache<T, E>,
    descriptor: D,
    fetcher: F,
    options: ResourceOptions<T>,
) -> CachedResource<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + fmt::Display + Send + Sync + 'static,
    D: Into<Descriptor>,
    F: Fn(Value, FetchInfo<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let resource = CachedResource::new(cache, descriptor, fetcher, options);
    let _ = resource.load().await;
    resource
}
