//! Cache configuration types.

use crate::error::{CacheError, CacheResult};
use std::time::Duration;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Connection URL (Redis backend only)
    pub url: String,

    /// Key prefix for all cache keys
    pub key_prefix: Option<String>,

    /// Default TTL for cache entries
    pub default_ttl: Option<Duration>,

    /// Connection timeout
    pub connection_timeout: Duration,
}

impl CacheConfig {
    /// Create a new Redis cache configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use pepo_cache::CacheConfig;
    ///
    /// let config = CacheConfig::redis("redis://localhost:6379").unwrap();
    /// assert_eq!(config.build_key("endpoint:1"), "endpoint:1");
    /// ```
    pub fn redis(url: impl Into<String>) -> CacheResult<Self> {
        let url = url.into();
        if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
            return Err(CacheError::Config(format!(
                "Redis URL must start with redis:// or rediss://, got {url}"
            )));
        }

        Ok(Self {
            url,
            key_prefix: None,
            default_ttl: None,
            connection_timeout: Duration::from_secs(5),
        })
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Build a full cache key with prefix.
    pub fn build_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{prefix}:{key}"),
            None => key.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config() {
        let config = CacheConfig::redis("redis://localhost:6379")
            .unwrap()
            .with_key_prefix("pepo")
            .with_default_ttl(Duration::from_secs(300));

        assert_eq!(config.build_key("webhook_endpoint:1"), "pepo:webhook_endpoint:1");
        assert_eq!(config.default_ttl, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_rejects_non_redis_url() {
        assert!(matches!(
            CacheConfig::redis("memcache://localhost:11211"),
            Err(CacheError::Config(_))
        ));
    }
}
