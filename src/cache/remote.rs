//! External key-value cache over Redis (feature `redis`).
//!
//! Multi-get uses a single `MGET`; multi-set is pipelined `SETEX`. Keys are
//! namespaced under `namespace:` so `clear` only removes our own entries.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

use super::backend::CacheBackend;
use super::key::CacheKey;
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RedisCache {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisCache {
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::cache(format!("Failed to create Redis client: {}", e)))?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, ConnectionManager::new(client))
            .await
            .map_err(|_| Error::cache(format!("Timed out connecting to Redis at {}", url)))?
            .map_err(|e| Error::cache(format!("Failed to connect to Redis: {}", e)))?;
        tracing::info!(url, "connected to external cache");
        Ok(Self {
            conn,
            namespace: namespace.into(),
        })
    }

    fn redis_key(&self, key: &CacheKey) -> String {
        format!("{}:{}", self.namespace, key.hash)
    }
}

fn redis_err(op: &str, e: redis::RedisError) -> Error {
    Error::cache(format!("Redis {} error: {}", op, e))
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<Vec<u8>>>(self.redis_key(key))
            .await
            .map_err(|e| redis_err("GET", e))
    }

    async fn set(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.redis_key(key), value, ttl_secs(ttl))
            .await
            .map_err(|e| redis_err("SETEX", e))
    }

    async fn get_many(&self, keys: &[CacheKey]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let names: Vec<String> = keys.iter().map(|k| self.redis_key(k)).collect();
        redis::cmd("MGET")
            .arg(&names)
            .query_async::<_, Vec<Option<Vec<u8>>>>(&mut conn)
            .await
            .map_err(|e| redis_err("MGET", e))
    }

    async fn set_many(&self, entries: &[(CacheKey, Vec<u8>)], ttl: Duration) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.set_ex(self.redis_key(key), value.as_slice(), ttl_secs(ttl))
                .ignore();
        }
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| redis_err("pipelined SETEX", e))
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .del(self.redis_key(key))
            .await
            .map_err(|e| redis_err("DEL", e))?;
        Ok(removed > 0)
    }

    async fn clear(&self) -> Result<()> {
        let keys = self.scan_keys().await?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys)
            .await
            .map_err(|e| redis_err("DEL", e))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.scan_keys().await?.len())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

impl RedisCache {
    async fn scan_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*", self.namespace);
        let mut iter = conn
            .scan_match::<_, String>(pattern)
            .await
            .map_err(|e| redis_err("SCAN", e))?;
        let mut keys = Vec::new();
        while let Some(k) = iter.next_item().await {
            keys.push(k);
        }
        Ok(keys)
    }
}
