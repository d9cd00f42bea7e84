//! Cached resources and mutations for TurboCommerce.
//!
//! Builds on `turbo-fetch-cache` with the surfaces application code uses:
//! - `create_cached_resource` / `CachedResource` - A fetch bound to a descriptor's key
//! - `mutate_cached_value` - Push a new value to every resource of a key
//! - `refetch_resource_for_key` - Make every resource of a key fetch again
//! - `Mutation` - An async action with loading/success/error flags
//!
//! # Example
//!
//! ```rust,ignore
//! use serde_json::json;
//! use turbo_resource::prelude::*;
//!
//! let cache: FetchCache<Cart, ApiError> = FetchCache::new(CacheConfig::new("carts"));
//!
//! // Both resources share one fetch
//! let header = create_cached_resource(&cache, json!(["cart", id]), load_cart, ResourceOptions::new()).await;
//! let sidebar = create_cached_resource(&cache, json!(["cart", id]), load_cart, ResourceOptions::new()).await;
//!
//! // Optimistic update reaches both
//! mutate_cached_value(&cache, json!(["cart", id]), Update::with(|cart| add_item(cart, item)));
//!
//! // Server state changed elsewhere
//! refetch_resource_for_key(&cache, json!(["cart", id]));
//! ```

mod mutation;
mod ops;
mod resource;

pub use mutation::{Mutation, MutationState};
pub use ops::{mutate_cached_value, refetch_resource_for_key, try_mutate_cached_value};
pub use resource::{
    create_cached_resource, CachedResource, FetchInfo, ResourceFetcher, ResourceOptions,
    ResourceState,
};

pub use turbo_fetch_cache::{
    CacheConfig, CacheError, CacheKey, CacheStats, Descriptor, FetchCache, Update,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        create_cached_resource, mutate_cached_value, refetch_resource_for_key, CacheConfig,
        CachedResource, Descriptor, FetchCache, FetchInfo, Mutation, ResourceOptions, Update,
    };
}
