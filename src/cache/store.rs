//! Response cache store.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::backend::{CacheBackend, MemoryCache};
use super::key::{CacheKey, CacheKeyGenerator};
use crate::config::OrchestratorConfig;
use crate::types::{ErrorKind, Request, Response};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub enabled: bool,
    pub max_entries: usize,
    /// Zero disables the background sweep; expiry is still checked on read.
    pub sweep_interval: Duration,
    pub key_prefix: Option<String>,
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            enabled: true,
            max_entries: 1000,
            sweep_interval: Duration::from_secs(60),
            key_prefix: None,
            redis_url: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_orchestrator(cfg: &OrchestratorConfig) -> Self {
        Self {
            default_ttl: cfg.default_cache_ttl(),
            enabled: cfg.cache.enabled,
            max_entries: cfg.cache.max_entries,
            sweep_interval: Duration::from_secs(cfg.cache.sweep_interval_secs),
            key_prefix: cfg.cache.key_prefix.clone(),
            redis_url: cfg.cache.redis_url.clone(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    /// Live entries in the in-process tier.
    pub entry_count: u64,
    pub sets: u64,
    /// Backing-store faults absorbed as misses.
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    errors: AtomicU64,
}

/// Memo of successful responses keyed by [`CacheKey`].
///
/// Always keeps an in-process tier; an external store, when attached, is
/// consulted on local misses and written through on every set. Faults of the
/// external store are logged and treated as misses.
pub struct CacheStore {
    config: CacheConfig,
    keys: CacheKeyGenerator,
    local: Arc<MemoryCache>,
    remote: Option<Box<dyn CacheBackend>>,
    stats: AtomicStats,
    sweeper: Option<JoinHandle<()>>,
}

impl CacheStore {
    /// In-process store without a background sweeper.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            local: Arc::new(MemoryCache::new(config.max_entries)),
            config,
            keys: CacheKeyGenerator::new(),
            remote: None,
            stats: AtomicStats::default(),
            sweeper: None,
        }
    }

    /// Build the store described by `config`: start the sweeper and attach
    /// the external cache when one is configured and reachable.
    pub async fn connect(config: CacheConfig) -> Self {
        let mut store = Self::new(config);
        if !store.config.sweep_interval.is_zero() {
            store.sweeper = Some(store.local.spawn_sweeper(store.config.sweep_interval));
        }
        if let Some(url) = store.config.redis_url.clone() {
            store.attach_redis(&url).await;
        }
        store
    }

    #[cfg(feature = "redis")]
    async fn attach_redis(&mut self, url: &str) {
        let namespace = self
            .config
            .key_prefix
            .clone()
            .unwrap_or_else(|| "omni:cache".to_string());
        match super::remote::RedisCache::connect(url, namespace).await {
            Ok(redis) => self.remote = Some(Box::new(redis)),
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    error_kind = ErrorKind::CacheUnavailable.as_str(),
                    "external cache unavailable, continuing in-process only: {}", e
                );
            }
        }
    }

    #[cfg(not(feature = "redis"))]
    async fn attach_redis(&mut self, url: &str) {
        warn!(
            url,
            "redis_url is set but the `redis` feature is not enabled; using in-process cache only"
        );
    }

    /// Attach an arbitrary external tier.
    pub fn with_remote(mut self, remote: Box<dyn CacheBackend>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_key_generator(mut self, keys: CacheKeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn key_for(&self, request: &Request) -> CacheKey {
        self.keys.for_request(request)
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn backend_name(&self) -> &'static str {
        self.remote
            .as_ref()
            .map(|r| r.name())
            .unwrap_or_else(|| self.local.name())
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Response> {
        self.get_many(std::slice::from_ref(key))
            .await
            .into_iter()
            .next()
            .flatten()
    }

    /// Positional multi-get; one round trip per tier.
    pub async fn get_many(&self, keys: &[CacheKey]) -> Vec<Option<Response>> {
        if !self.config.enabled || keys.is_empty() {
            self.stats
                .misses
                .fetch_add(keys.len() as u64, Ordering::Relaxed);
            return vec![None; keys.len()];
        }
        let prefixed: Vec<CacheKey> = keys.iter().map(|k| self.prefix_key(k)).collect();

        let mut out: Vec<Option<Response>> = match self.local.get_many(&prefixed).await {
            Ok(raw) => raw.into_iter().map(|r| r.and_then(|b| self.decode(&b))).collect(),
            Err(e) => {
                self.absorb("local get", &e);
                vec![None; keys.len()]
            }
        };

        if let Some(remote) = &self.remote {
            let missing: Vec<usize> = (0..out.len()).filter(|&i| out[i].is_none()).collect();
            if !missing.is_empty() {
                let remote_keys: Vec<CacheKey> =
                    missing.iter().map(|&i| prefixed[i].clone()).collect();
                match remote.get_many(&remote_keys).await {
                    Ok(raw) => {
                        for (i, bytes) in missing.into_iter().zip(raw) {
                            out[i] = bytes.and_then(|b| self.decode(&b));
                        }
                    }
                    Err(e) => self.absorb("remote get", &e),
                }
            }
        }

        let hits = out.iter().filter(|r| r.is_some()).count() as u64;
        self.stats.hits.fetch_add(hits, Ordering::Relaxed);
        self.stats
            .misses
            .fetch_add(out.len() as u64 - hits, Ordering::Relaxed);
        debug!(requested = out.len(), hits, "cache lookup");
        out
    }

    /// Store `response` under `key`. Failed responses are ignored.
    pub async fn set(&self, key: &CacheKey, response: &Response, ttl: Duration) {
        self.set_many(&[(key.clone(), response.clone())], ttl).await;
    }

    pub async fn set_many(&self, entries: &[(CacheKey, Response)], ttl: Duration) {
        if !self.config.enabled {
            return;
        }
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, response) in entries.iter().filter(|(_, r)| r.succeeded) {
            match serde_json::to_vec(response) {
                Ok(bytes) => encoded.push((self.prefix_key(key), bytes)),
                Err(e) => self.absorb("encode", &crate::Error::from(e)),
            }
        }
        if encoded.is_empty() {
            return;
        }
        if let Err(e) = self.local.set_many(&encoded, ttl).await {
            self.absorb("local set", &e);
            return;
        }
        self.stats
            .sets
            .fetch_add(encoded.len() as u64, Ordering::Relaxed);
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.set_many(&encoded, ttl).await {
                self.absorb("remote set", &e);
            }
        }
    }

    pub async fn delete(&self, key: &CacheKey) -> bool {
        let prefixed = self.prefix_key(key);
        let local = self.local.delete(&prefixed).await.unwrap_or(false);
        let remote = match &self.remote {
            Some(r) => match r.delete(&prefixed).await {
                Ok(d) => d,
                Err(e) => {
                    self.absorb("remote delete", &e);
                    false
                }
            },
            None => false,
        };
        local || remote
    }

    pub async fn clear(&self) {
        if let Err(e) = self.local.clear().await {
            self.absorb("local clear", &e);
        }
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.clear().await {
                self.absorb("remote clear", &e);
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.stats.hits.load(Ordering::Relaxed),
            miss_count: self.stats.misses.load(Ordering::Relaxed),
            entry_count: self.local.len().await.unwrap_or(0) as u64,
            sets: self.stats.sets.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Option<Response> {
        match serde_json::from_slice::<Response>(bytes) {
            Ok(r) => Some(r),
            Err(e) => {
                self.absorb("decode", &crate::Error::from(e));
                None
            }
        }
    }

    fn absorb(&self, op: &str, err: &crate::Error) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            op,
            error_kind = ErrorKind::CacheUnavailable.as_str(),
            "cache fault treated as miss: {}",
            err
        );
    }

    fn prefix_key(&self, key: &CacheKey) -> CacheKey {
        match self.config.key_prefix {
            Some(ref p) => key.prefixed(p),
            None => key.clone(),
        }
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.take() {
            handle.abort();
        }
    }
}
