//! Descriptor-addressed mutation and refetch.

use std::fmt;

use tracing::trace;
use turbo_fetch_cache::{derive_key, Descriptor, FetchCache, Update};

/// Replace the cached value for `descriptor` and push it to every resource
/// bound to the same key.
///
/// Returns the new value, or `None` without touching anything when the
/// descriptor derives no key.
pub fn mutate_cached_value<T, E, D>(
    cache: &FetchCache<T, E>,
    descriptor: D,
    update: Update<T>,
) -> Option<T>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + fmt::Display + Send + Sync + 'static,
    D: Into<Descriptor>,
{
    let Some(key) = derive_key(&descriptor.into()) else {
        trace!(cache = %cache.config().name, "mutation skipped, descriptor has no key");
        return None;
    };
    Some(cache.mutate(&key, update))
}

/// Like [`mutate_cached_value`], with a fallible updater.
///
/// A failing updater leaves the cache and every bound resource unchanged.
pub fn try_mutate_cached_value<T, E, D, F, R>(
    cache: &FetchCache<T, E>,
    descriptor: D,
    updater: F,
) -> Result<Option<T>, R>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + fmt::Display + Send + Sync + 'static,
    D: Into<Descriptor>,
    F: FnOnce(Option<&T>) -> Result<T, R>,
{
    match derive_key(&descriptor.into()) {
        Some(key) => cache.try_mutate(&key, updater).map(Some),
        None => Ok(None),
    }
}

/// Ask every resource bound to `descriptor`'s key to fetch again.
///
/// Returns how many resources were asked; zero for "no key" and for keys
/// nothing is bound to.
pub fn refetch_resource_for_key<T, E, D>(cache: &FetchCache<T, E>, descriptor: D) -> usize
where
    T: Clone + Send + Sync + 'static,
    E: Clone + fmt::Display + Send + Sync + 'static,
    D: Into<Descriptor>,
{
    match derive_key(&descriptor.into()) {
        Some(key) => cache.refetch_all(&key),
        None => 0,
    }
}
