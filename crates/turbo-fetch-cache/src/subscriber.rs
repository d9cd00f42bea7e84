//! Subscriber capability and registration tokens.

use std::fmt;
use std::sync::{Arc, Weak};

/// A long-lived binding that mirrors the cached value for one key.
///
/// The cache never owns a subscriber: it keeps a weak reference plus the
/// [`SubscriberId`] handed out at registration, and the binding's owner
/// decides when to unregister.
///
/// `force_set` runs inside the notification pass for its key. From there a
/// binding may read the cache and mutate, resolve or (un)register on other
/// keys. It must not, for the key being notified, call `mutate` or
/// `try_mutate`, unregister a subscriber, or drive a fetch to settlement;
/// those wait for the pass to end and would deadlock. The same holds for a
/// chain of such calls across keys that leads back to the notified key.
pub trait Subscriber<T>: Send + Sync {
    /// Overwrite the bound value without running a fetch.
    ///
    /// `None` means the value is unresolved (the last fetch failed).
    fn force_set(&self, value: Option<T>);

    /// Ask the binding to run its own fetch cycle again.
    fn refetch(&self);
}

/// Token identifying one subscriber registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw token value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A registered subscriber, held weakly.
pub(crate) struct Registration<T> {
    pub(crate) id: SubscriberId,
    handle: Weak<dyn Subscriber<T>>,
}

impl<T: 'static> Registration<T> {
    pub(crate) fn new<S>(id: SubscriberId, handle: &Arc<S>) -> Self
    where
        S: Subscriber<T> + 'static,
    {
        let handle: Weak<S> = Arc::downgrade(handle);
        Self { id, handle }
    }

    /// Strong handle, or `None` when the owner has already dropped it.
    pub(crate) fn upgrade(&self) -> Option<Arc<dyn Subscriber<T>>> {
        self.handle.upgrade()
    }
}
