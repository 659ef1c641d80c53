//! 配置模块：从 YAML 与环境变量加载编排核心的只读配置。
//!
//! # Configuration
//!
//! The configuration source supplies per-backend connection settings and the
//! global concurrency/cache knobs. It is read once at startup and treated as
//! read-only afterwards.
//!
//! ```yaml
//! max_concurrent_requests: 3
//! default_cache_ttl_secs: 3600
//! batch_size: 5
//! cache:
//!   redis_url: redis://localhost:6379/0
//! backends:
//!   - id: openai
//!     kind: openai
//!     base_url: https://api.openai.com/v1
//!     default_model: gpt-4o
//!     credential: OPENAI_API_KEY
//!     rate_limit: 2.0
//! ```
//!
//! Environment overrides (applied by [`OrchestratorConfig::apply_env_overrides`]):
//! - `OMNI_MAX_CONCURRENT_REQUESTS`
//! - `OMNI_CACHE_TTL_SECS`
//! - `OMNI_BATCH_SIZE`
//! - `OMNI_REDIS_URL`
//! - `WATSONX_PROJECT_ID` (fills `project_id` of watsonx backends that lack one)

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::types::GenerationParams;
use crate::{Error, ErrorContext, Result};

/// Backend variants understood by the adapter factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local model runner.
    Ollama,
    OpenAi,
    Gemini,
    /// Enterprise backend with short-lived IAM tokens.
    Watsonx,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Ollama => "ollama",
            BackendKind::OpenAi => "openai",
            BackendKind::Gemini => "gemini",
            BackendKind::Watsonx => "watsonx",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    pub kind: BackendKind,
    pub base_url: String,
    pub default_model: String,
    /// Requests per second; `None` disables client-side rate limiting.
    #[serde(default)]
    pub rate_limit: Option<f64>,
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
    /// Name handed to the security collaborator's `decrypt_credential`.
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    /// Token-exchange endpoint for backends that need one.
    #[serde(default)]
    pub auth_url: Option<String>,
}

impl BackendConfig {
    pub fn new(
        id: impl Into<String>,
        kind: BackendKind,
        base_url: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            base_url: base_url.into(),
            default_model: default_model.into(),
            rate_limit: None,
            timeout_secs: default_backend_timeout_secs(),
            credential: None,
            project_id: None,
            auth_url: None,
        }
    }

    pub fn with_credential(mut self, name: impl Into<String>) -> Self {
        self.credential = Some(name.into());
        self
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_auth_url(mut self, url: impl Into<String>) -> Self {
        self.auth_url = Some(url.into());
        self
    }

    pub fn with_rate_limit(mut self, rps: f64) -> Self {
        self.rate_limit = Some(rps);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_entries: usize,
    pub sweep_interval_secs: u64,
    pub key_prefix: Option<String>,
    pub redis_url: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            sweep_interval_secs: 60,
            key_prefix: None,
            redis_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_concurrent_requests: usize,
    pub default_cache_ttl_secs: u64,
    pub batch_size: usize,
    /// Per-call deadline when a backend does not set its own `timeout_secs`.
    pub request_timeout_secs: u64,
    pub default_temperature: f64,
    pub default_max_tokens: u32,
    pub retry: RetrySettings,
    pub cache: CacheSettings,
    pub backends: Vec<BackendConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 3,
            default_cache_ttl_secs: 3600,
            batch_size: 5,
            request_timeout_secs: 120,
            default_temperature: 0.7,
            default_max_tokens: 2000,
            retry: RetrySettings::default(),
            cache: CacheSettings::default(),
            backends: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Global defaults plus the four backends of the workbench.
    pub fn workbench() -> Self {
        Self {
            backends: vec![
                BackendConfig::new(
                    "ollama",
                    BackendKind::Ollama,
                    "http://localhost:11434",
                    "llama2",
                ),
                BackendConfig::new(
                    "watsonx",
                    BackendKind::Watsonx,
                    "https://us-south.ml.cloud.ibm.com",
                    "meta-llama/llama-3-70b-instruct",
                )
                .with_credential("WATSONX_API_KEY")
                .with_auth_url("https://iam.cloud.ibm.com/identity/token"),
                BackendConfig::new(
                    "gemini",
                    BackendKind::Gemini,
                    "https://generativelanguage.googleapis.com/v1beta",
                    "gemini-1.5-flash",
                )
                .with_credential("GEMINI_API_KEY"),
                BackendConfig::new(
                    "openai",
                    BackendKind::OpenAi,
                    "https://api.openai.com/v1",
                    "gpt-4o",
                )
                .with_credential("OPENAI_API_KEY"),
            ],
            ..Self::default()
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(yaml)?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse::<usize>("OMNI_MAX_CONCURRENT_REQUESTS") {
            self.max_concurrent_requests = v;
        }
        if let Some(v) = env_parse::<u64>("OMNI_CACHE_TTL_SECS") {
            self.default_cache_ttl_secs = v;
        }
        if let Some(v) = env_parse::<usize>("OMNI_BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Ok(url) = env::var("OMNI_REDIS_URL") {
            if !url.trim().is_empty() {
                self.cache.redis_url = Some(url);
            }
        }
        if let Ok(project) = env::var("WATSONX_PROJECT_ID") {
            if !project.trim().is_empty() {
                for b in self
                    .backends
                    .iter_mut()
                    .filter(|b| b.kind == BackendKind::Watsonx && b.project_id.is_none())
                {
                    b.project_id = Some(project.clone());
                }
            }
        }
        self
    }

    /// Structural validation. Credentials are checked later, per adapter.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_requests == 0 {
            return Err(invalid("max_concurrent_requests", "must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be at least 1"));
        }
        self.default_params().validate().map_err(|e| {
            Error::configuration_with_context(
                e.to_string(),
                ErrorContext::new()
                    .with_field_path("default_temperature")
                    .with_source("config_loader"),
            )
        })?;
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("retry.base_delay_ms", "must not exceed retry.max_delay_ms"));
        }

        let mut seen = HashSet::new();
        for (i, b) in self.backends.iter().enumerate() {
            if b.id.trim().is_empty() {
                return Err(invalid(&format!("backends[{}].id", i), "must not be empty"));
            }
            if !seen.insert(b.id.as_str()) {
                return Err(invalid(
                    &format!("backends[{}].id", i),
                    &format!("duplicate backend id '{}'", b.id),
                ));
            }
            if let Err(e) = Url::parse(&b.base_url) {
                return Err(invalid(
                    &format!("backends[{}].base_url", i),
                    &format!("'{}' is not a valid URL: {}", b.base_url, e),
                ));
            }
            if let Some(rps) = b.rate_limit {
                if !rps.is_finite() || rps < 0.0 {
                    return Err(invalid(
                        &format!("backends[{}].rate_limit", i),
                        "must be a non-negative number",
                    ));
                }
            }
            if b.timeout_secs == 0 {
                return Err(invalid(
                    &format!("backends[{}].timeout_secs", i),
                    "must be at least 1",
                ));
            }
        }
        Ok(())
    }

    pub fn backend(&self, id: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.id == id)
    }

    pub fn default_params(&self) -> GenerationParams {
        GenerationParams::new(self.default_temperature, self.default_max_tokens)
    }

    pub fn default_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.default_cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_backend_timeout_secs() -> u64 {
    120
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn invalid(field: &str, msg: &str) -> Error {
    Error::configuration_with_context(
        msg.to_string(),
        ErrorContext::new()
            .with_field_path(field)
            .with_source("config_loader"),
    )
}
