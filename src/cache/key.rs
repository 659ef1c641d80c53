//! Cache key generation.
//!
//! A key is the SHA-256 of a canonical JSON document built from every field
//! that influences a generation. Temperature is hashed at full precision so
//! `0.7` and `0.70001` never collide.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::types::Request;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
    pub backend_id: Option<String>,
    pub model: Option<String>,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            backend_id: None,
            model: None,
        }
    }

    pub fn with_backend(mut self, backend_id: impl Into<String>) -> Self {
        self.backend_id = Some(backend_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }

    /// Same key under a namespace prefix (`prefix:hash`).
    pub fn prefixed(&self, prefix: &str) -> Self {
        Self {
            hash: format!("{}:{}", prefix, self.hash),
            ..self.clone()
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mix a namespace into every hash, e.g. to invalidate after a prompt
    /// template change.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn generate(
        &self,
        prompt: &str,
        backend_id: &str,
        model: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> CacheKey {
        let mut parts: BTreeMap<&str, Value> = BTreeMap::new();
        parts.insert("prompt", json!(prompt));
        parts.insert("backend_id", json!(backend_id));
        parts.insert("model", json!(model));
        parts.insert("temperature", json!(temperature));
        parts.insert("max_tokens", json!(max_tokens));
        if let Some(ref s) = self.salt {
            parts.insert("salt", json!(s));
        }
        let canonical = serde_json::to_string(&parts).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        CacheKey::new(hash)
            .with_backend(backend_id)
            .with_model(model)
    }

    pub fn for_request(&self, request: &Request) -> CacheKey {
        self.generate(
            &request.prompt,
            &request.backend_id,
            &request.model_name,
            request.temperature,
            request.max_tokens,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerationParams;

    fn base() -> Request {
        Request::new(
            "gen-dockerfile-node",
            "openai",
            "gpt-4o",
            GenerationParams::new(0.7, 2000),
        )
    }

    #[test]
    fn test_identical_requests_share_key() {
        let g = CacheKeyGenerator::new();
        assert_eq!(g.for_request(&base()), g.for_request(&base()));
        assert_eq!(g.for_request(&base()).hash.len(), 64);
    }

    #[test]
    fn test_any_field_change_changes_key() {
        let g = CacheKeyGenerator::new();
        let k = g.for_request(&base()).hash;

        let mut variants = Vec::new();
        let mut r = base();
        r.prompt.push('!');
        variants.push(r);
        let mut r = base();
        r.backend_id = "gemini".into();
        variants.push(r);
        let mut r = base();
        r.model_name = "gpt-4o-mini".into();
        variants.push(r);
        let mut r = base();
        r.temperature = 0.70001;
        variants.push(r);
        let mut r = base();
        r.max_tokens = 2001;
        variants.push(r);

        for v in variants {
            assert_ne!(g.for_request(&v).hash, k, "{:?}", v);
        }
    }

    #[test]
    fn test_field_boundaries_do_not_collide() {
        let g = CacheKeyGenerator::new();
        let a = g.generate("ab", "c", "m", 0.5, 10);
        let b = g.generate("a", "bc", "m", 0.5, 10);
        assert_ne!(a, b);
    }

    #[test]
    fn test_salt_and_prefix() {
        let plain = CacheKeyGenerator::new().for_request(&base());
        let salted = CacheKeyGenerator::new().with_salt("v2").for_request(&base());
        assert_ne!(plain.hash, salted.hash);
        assert!(plain.prefixed("omni").hash.starts_with("omni:"));
    }
}
