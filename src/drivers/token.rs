//! Short-lived auth token cache for enterprise backends.
//!
//! Tokens are keyed by `(auth endpoint, credential name)` so several
//! accounts can share one process-wide cache. Refresh is single-flight per
//! key: concurrent callers that find the token missing or expired wait on
//! one exchange instead of each hitting the auth endpoint, while refreshes
//! of other keys proceed independently.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use crate::types::ErrorInfo;

/// Refresh this long before the advertised expiry.
pub const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(600);

/// Lifetime assumed when the auth endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3000);

static SHARED: Lazy<Arc<TokenCache>> = Lazy::new(|| Arc::new(TokenCache::new()));

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: Instant,
}

impl CachedToken {
    pub fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: RwLock<HashMap<String, CachedToken>>,
    refresh: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide instance used by adapters built from configuration.
    pub fn shared() -> Arc<TokenCache> {
        SHARED.clone()
    }

    /// Return a valid token for `key`, running `fetch` at most once across
    /// concurrent callers when a refresh is needed.
    ///
    /// `fetch` resolves to the token and the advertised `expires_in` seconds.
    pub async fn get_or_refresh<F, Fut>(&self, key: &str, fetch: F) -> Result<String, ErrorInfo>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, Option<u64>), ErrorInfo>>,
    {
        if let Some(token) = self.valid(key).await {
            return Ok(token);
        }

        let lock = self.refresh_lock(key).await;
        let _guard = lock.lock().await;
        // another caller may have refreshed while we waited
        if let Some(token) = self.valid(key).await {
            return Ok(token);
        }

        let (token, expires_in) = fetch().await?;
        let ttl = effective_ttl(expires_in);
        debug!(key, ttl_secs = ttl.as_secs(), "auth token refreshed");
        self.tokens.write().await.insert(
            key.to_string(),
            CachedToken {
                token: token.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(token)
    }

    /// Drop `token` for `key` if it is still the cached one.
    ///
    /// Called after a backend rejects a token, so a token refreshed by a
    /// concurrent caller in the meantime is kept.
    pub async fn invalidate(&self, key: &str, token: &str) {
        let mut tokens = self.tokens.write().await;
        if tokens.get(key).map(|c| c.token == token).unwrap_or(false) {
            tokens.remove(key);
            debug!(key, "auth token invalidated");
        }
    }

    pub async fn clear(&self) {
        self.tokens.write().await.clear();
    }

    async fn refresh_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.refresh
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    async fn valid(&self, key: &str) -> Option<String> {
        self.tokens
            .read()
            .await
            .get(key)
            .filter(|c| c.is_valid())
            .map(|c| c.token.clone())
    }
}

fn effective_ttl(expires_in: Option<u64>) -> Duration {
    match expires_in {
        Some(secs) if secs > EXPIRY_SAFETY_MARGIN.as_secs() => {
            Duration::from_secs(secs) - EXPIRY_SAFETY_MARGIN
        }
        Some(secs) if secs > 0 => Duration::from_secs((secs / 2).max(1)),
        _ => DEFAULT_TOKEN_TTL,
    }
}
