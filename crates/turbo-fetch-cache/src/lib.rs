//! Key-addressed, single-flight fetch cache for TurboCommerce.
//!
//! This crate provides:
//! - `Descriptor` / `derive_key` - Canonical cache keys for request descriptors
//! - `CacheStore` - Per-key entries: cached value, waiters, subscribers
//! - `FetchCache` - Single-flight fetch coordination, mutation and refetch broadcast
//! - `Subscriber` - Capability implemented by long-lived bindings
//! - `CacheConfig` / `CacheStats` - Configuration and counters
//!
//! # Example
//!
//! ```ignore
//! use serde_json::json;
//! use turbo_fetch_cache::{CacheConfig, Descriptor, FetchCache, Update};
//!
//! let cache: FetchCache<User, FetchError> = FetchCache::new(CacheConfig::new("users"));
//!
//! // Structurally equal descriptors share one key
//! let key = Descriptor::literal(json!({"user": 42, "expand": true}))
//!     .key()
//!     .expect("descriptor has a key");
//!
//! // Concurrent resolves share a single fetch
//! let user = cache.resolve(&key, || api.load_user(42), false).await?;
//!
//! // Push a local edit to every binding of the key
//! cache.mutate(&key, Update::with(|prev| rename(prev, "Ada")));
//! ```

mod config;
mod coordinator;
mod error;
mod key;
mod stats;
mod store;
mod subscriber;

pub use config::*;
pub use coordinator::*;
pub use error::*;
pub use key::*;
pub use stats::CacheStats;
pub use store::CacheStore;
pub use subscriber::{Subscriber, SubscriberId};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        derive_key, CacheConfig, CacheKey, Descriptor, FetchCache, Subscriber, SubscriberId,
        Update,
    };
}
