//! Cache error types.

use thiserror::Error;

/// Result type for cache setup operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised while configuring the cache or building descriptors.
///
/// Fetch failures are never wrapped in this type: they are handed back to
/// every caller exactly as the fetch function produced them.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Failed to parse a configuration document.
    #[error("Invalid cache config: {0}")]
    Config(String),

    /// Failed to turn a value into a request descriptor.
    #[error("Descriptor serialization error: {0}")]
    Descriptor(#[from] serde_json::Error),
}
