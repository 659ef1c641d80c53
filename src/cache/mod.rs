//! 响应缓存模块：按请求指纹记忆成功的后端响应，支持过期与外部共享缓存。
//!
//! # Response Cache
//!
//! Memoizes successful backend responses so identical requests are served
//! without a network call until their TTL elapses.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheStore`] | Two-tier store with TTL, statistics and fail-open semantics |
//! | [`CacheConfig`] | TTL, capacity, sweep interval and optional external URL |
//! | [`CacheBackend`] | Trait for byte-level backing stores |
//! | [`MemoryCache`] | In-process LRU with lazy expiry and periodic sweep |
//! | [`NullCache`] | No-op backend |
//! | [`CacheKey`] | SHA-256 request fingerprint |
//! | [`SingleFlight`] | Coalesces concurrent fetches of one key |
//!
//! With the `redis` feature, `RedisCache` provides the external tier shared
//! between processes.
//!
//! ## Example
//!
//! ```rust
//! use omni_orchestrator::cache::{CacheConfig, CacheStore};
//! use std::time::Duration;
//!
//! let store = CacheStore::new(CacheConfig::new().with_ttl(Duration::from_secs(600)));
//! assert!(store.is_enabled());
//! ```
//!
//! ## Cache Key Generation
//!
//! Keys cover prompt, backend id, model name, temperature and max tokens.
//! Changing any of them yields a different key.

mod backend;
mod flight;
mod key;
#[cfg(feature = "redis")]
mod remote;
mod store;

pub use backend::{CacheBackend, MemoryCache, NullCache};
pub use flight::SingleFlight;
pub use key::{CacheKey, CacheKeyGenerator};
#[cfg(feature = "redis")]
pub use remote::RedisCache;
pub use store::{CacheConfig, CacheStats, CacheStore};
