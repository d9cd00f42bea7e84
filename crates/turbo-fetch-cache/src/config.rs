//! Cache configuration.

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Configuration for a [`FetchCache`](crate::FetchCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache name, attached to every log event.
    pub name: String,
    /// Default for bindings that do not say whether a mounted binding
    /// should fetch even when a value is already cached.
    pub refetch_on_mount: bool,
    /// Whether derived keys are written to logs. Keys can carry user data.
    pub log_keys: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            refetch_on_mount: true,
            log_keys: true,
        }
    }
}

impl CacheConfig {
    /// Create a configuration with the given cache name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the default refetch-on-mount behavior.
    pub fn with_refetch_on_mount(mut self, enabled: bool) -> Self {
        self.refetch_on_mount = enabled;
        self
    }

    /// Enable or disable key logging.
    pub fn with_log_keys(mut self, enabled: bool) -> Self {
        self.log_keys = enabled;
        self
    }

    /// Parse a TOML configuration document.
    pub fn from_toml_str(content: &str) -> CacheResult<Self> {
        toml::from_str(content).map_err(|e| CacheError::Config(e.to_string()))
    }

    /// Parse a JSON configuration document.
    pub fn from_json_str(content: &str) -> CacheResult<Self> {
        serde_json::from_str(content).map_err(|e| CacheError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();

        assert_eq!(config.name, "default");
        assert!(config.refetch_on_mount);
        assert!(config.log_keys);
    }

    #[test]
    fn test_cache_config_builder_chain() {
        let config = CacheConfig::new("products")
            .with_refetch_on_mount(false)
            .with_log_keys(false);

        assert_eq!(config.name, "products");
        assert!(!config.refetch_on_mount);
        assert!(!config.log_keys);
    }

    #[test]
    fn test_cache_config_from_toml_partial() {
        let config = CacheConfig::from_toml_str(
            r#"
            name = "users"
            log_keys = false
            "#,
        )
        .unwrap();

        assert_eq!(config.name, "users");
        assert!(!config.log_keys);
        assert!(config.refetch_on_mount); // Default
    }

    #[test]
    fn test_cache_config_from_json() -> anyhow::Result<()> {
        let config = CacheConfig::from_json_str(r#"{"name":"cart","refetch_on_mount":false}"#)?;

        assert_eq!(config.name, "cart");
        assert!(!config.refetch_on_mount);
        Ok(())
    }

    #[test]
    fn test_cache_config_invalid_toml() {
        let err = CacheConfig::from_toml_str("name = ").unwrap_err();
        assert!(matches!(err, CacheError::Config(_)));
    }
}
