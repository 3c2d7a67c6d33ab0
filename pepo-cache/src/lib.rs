//! Cache boundary for the Pepo webhook services.
//!
//! Endpoint rows are served through a read-through cache that every mutating
//! endpoint operation invalidates. This crate defines that cache as the
//! [`CacheStore`] trait and ships two backends:
//!
//! - [`InMemoryCache`] - process-local, used by tests and single-node setups
//! - `RedisCache` - shared cache, behind the `redis` feature
//!
//! # Example
//!
//! ```
//! use pepo_cache::*;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), CacheError> {
//! let cache = InMemoryCache::new();
//! set(&cache, "webhook_endpoint:42", &vec!["a", "b"], Some(Duration::from_secs(60))).await?;
//!
//! let cached: Option<Vec<String>> = get(&cache, "webhook_endpoint:42").await?;
//! assert_eq!(cached.map(|v| v.len()), Some(2));
//!
//! cache.delete("webhook_endpoint:42").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod helpers;
pub mod memory;
pub mod traits;

#[cfg(feature = "redis")]
pub mod redis_cache;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use helpers::*;
pub use memory::InMemoryCache;
pub use traits::CacheStore;

#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;
