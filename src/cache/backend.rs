//! Cache backend implementations.

use super::key::CacheKey;
use crate::Result;
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone)]
struct CacheEntry {
    data: Vec<u8>,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data,
            created_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now > self.created_at + self.ttl
    }
}

/// Byte-level key/value store with per-entry TTL.
///
/// The batch methods default to a per-key loop; stores with a native
/// multi-get/multi-set override them.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()>;

    async fn get_many(&self, keys: &[CacheKey]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    async fn set_many(&self, entries: &[(CacheKey, Vec<u8>)], ttl: Duration) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value, ttl).await?;
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
    /// Number of live (unexpired) entries.
    async fn len(&self) -> Result<usize>;
    fn name(&self) -> &'static str;
}

/// In-process LRU map with lazy expiry on read and an optional periodic sweep.
///
/// One mutex guards the map, so a sweep can never interleave with the
/// check-then-remove sequence of a read.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Remove every expired entry; returns how many were reclaimed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            entries.pop(k);
        }
        expired.len()
    }

    /// Run [`MemoryCache::sweep`] every `interval` until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.sweep().await;
                if removed > 0 {
                    debug!(removed, "memory cache sweep");
                }
            }
        })
    }

    /// Physically present entries, expired or not.
    pub async fn physical_len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(&key.hash) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.data.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(&key.hash);
        }
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()> {
        self.entries
            .lock()
            .await
            .put(key.hash.clone(), CacheEntry::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn get_many(&self, keys: &[CacheKey]) -> Result<Vec<Option<Vec<u8>>>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let state = entries
                .get(&key.hash)
                .map(|e| (!e.is_expired(now)).then(|| e.data.clone()));
            let hit = match state {
                Some(Some(data)) => Some(data),
                Some(None) => {
                    entries.pop(&key.hash);
                    None
                }
                None => None,
            };
            out.push(hit);
        }
        Ok(out)
    }

    async fn set_many(&self, items: &[(CacheKey, Vec<u8>)], ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        for (key, value) in items {
            entries.put(key.hash.clone(), CacheEntry::new(value.clone(), ttl));
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.entries.lock().await.pop(&key.hash).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .count())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

pub struct NullCache;

impl NullCache {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _: &CacheKey) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
    async fn set(&self, _: &CacheKey, _: &[u8], _: Duration) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    async fn len(&self) -> Result<usize> {
        Ok(0)
    }
    fn name(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_lazy_expiry_on_read() {
        let cache = MemoryCache::new(10);
        let key = CacheKey::new("k");
        cache.set(&key, b"v", Duration::from_secs(1)).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some(&b"v"[..]));

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(cache.physical_len().await, 1);
        assert!(cache.get(&key).await.unwrap().is_none());
        assert_eq!(cache.physical_len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_reclaims_expired() {
        let cache = MemoryCache::new(10);
        cache.set(&"a".into(), b"1", Duration::from_secs(1)).await.unwrap();
        cache.set(&"b".into(), b"2", Duration::from_secs(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.len().await.unwrap(), 1);
        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.physical_len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_stops_with_cache() {
        let cache = Arc::new(MemoryCache::new(10));
        cache.set(&"a".into(), b"1", Duration::from_secs(1)).await.unwrap();
        let handle = cache.spawn_sweeper(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(cache.physical_len().await, 0);

        drop(cache);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_lru_eviction_and_batch_ops() {
        let cache = MemoryCache::new(2);
        let ttl = Duration::from_secs(60);
        cache
            .set_many(
                &[("a".into(), b"1".to_vec()), ("b".into(), b"2".to_vec())],
                ttl,
            )
            .await
            .unwrap();
        // touch "a" so "b" is least recently used
        assert!(cache.get(&"a".into()).await.unwrap().is_some());
        cache.set(&"c".into(), b"3", ttl).await.unwrap();

        let got = cache
            .get_many(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(got[0].as_deref(), Some(&b"1"[..]));
        assert!(got[1].is_none());
        assert_eq!(got[2].as_deref(), Some(&b"3"[..]));
    }

    #[tokio::test]
    async fn test_null_cache_never_hits() {
        let cache = NullCache::new();
        cache.set(&"a".into(), b"1", Duration::from_secs(60)).await.unwrap();
        assert!(cache.get(&"a".into()).await.unwrap().is_none());
        assert_eq!(cache.len().await.unwrap(), 0);
    }
}
