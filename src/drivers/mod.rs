//! 后端适配层：通过 trait 统一不同模型后端的请求构造与响应解析
//!
//! Backend adapter layer. Every backend variant implements [`BackendAdapter`]
//! so the controller, aggregator and facade can drive local, hosted and
//! enterprise backends through one `Arc<dyn BackendAdapter>` interface.
//!
//! Adapters never return `Err` from [`BackendAdapter::generate`]: transport
//! faults, HTTP errors and malformed bodies all become a failed
//! [`Response`] carrying a classified [`ErrorKind`].

pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod token;
pub mod watsonx;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{BackendConfig, BackendKind, OrchestratorConfig};
use crate::security::{Credential, SecurityValidator};
use crate::transport::HttpTransport;
use crate::types::{ErrorInfo, ErrorKind, Request, Response};
use crate::{Error, Result};

pub use gemini::GeminiAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;
pub use token::{CachedToken, TokenCache};
pub use watsonx::WatsonxAdapter;

/// Text and usage extracted from a successful backend body.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub token_count: u32,
    /// Generated tokens only, when the backend reports them apart from
    /// the prompt.
    pub completion_tokens: Option<u32>,
}

/// Uniform contract over one backend variant.
#[async_trait]
pub trait BackendAdapter: Send + Sync + fmt::Debug {
    /// Identifier the backend is registered under (matches config `id`).
    fn backend_id(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Model used when a request leaves `model_name` empty.
    fn default_model(&self) -> &str;

    /// Perform one generation. Failures are returned as data.
    async fn generate(&self, request: &Request) -> Response;

    /// Positional batch. Variants without a native batch endpoint run the
    /// items one after another.
    async fn generate_batch(&self, requests: &[Request]) -> Vec<Response> {
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            out.push(self.generate(request).await);
        }
        out
    }

    /// Check that everything the backend needs is present: `(ok, message)`.
    fn validate_config(&self) -> (bool, String);
}

/// State shared by the HTTP-backed adapters.
pub(crate) struct AdapterContext {
    pub(crate) config: BackendConfig,
    pub(crate) security: Arc<dyn SecurityValidator>,
    pub(crate) transport: HttpTransport,
}

impl AdapterContext {
    pub(crate) fn new(config: BackendConfig, security: Arc<dyn SecurityValidator>) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout())?;
        Ok(Self {
            config,
            security,
            transport,
        })
    }

    pub(crate) fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    pub(crate) fn model_for<'a>(&'a self, request: &'a Request) -> &'a str {
        if request.model_name.trim().is_empty() {
            &self.config.default_model
        } else {
            &request.model_name
        }
    }

    /// Decrypt the configured credential for the call about to be made.
    pub(crate) fn credential(&self) -> std::result::Result<Credential, ErrorInfo> {
        let name = self.config.credential.as_deref().ok_or_else(|| {
            ErrorInfo::new(
                ErrorKind::ConfigInvalid,
                format!("backend '{}' has no credential configured", self.config.id),
            )
        })?;
        self.security
            .decrypt_credential(name)
            .map_err(|e| ErrorInfo::new(ErrorKind::ConfigInvalid, e.to_string()))
    }

    /// Shared credential check used by `validate_config` of hosted adapters.
    pub(crate) fn check_credential(&self) -> (bool, String) {
        match self.credential() {
            Ok(c) if c.expose().trim().len() > 10 => {
                (true, format!("{} credential present", self.config.id))
            }
            Ok(_) => (
                false,
                format!("{} credential looks truncated", self.config.id),
            ),
            Err(e) => (false, e.message),
        }
    }
}

impl fmt::Debug for AdapterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterContext")
            .field("backend_id", &self.config.id)
            .field("base_url", &self.config.base_url)
            .field("default_model", &self.config.default_model)
            .finish()
    }
}

/// Turn the outcome of one call into a [`Response`], logging failures.
pub(crate) fn finish(
    backend_id: &str,
    started: Instant,
    outcome: std::result::Result<Completion, ErrorInfo>,
) -> Response {
    let latency = started.elapsed();
    match outcome {
        Ok(c) => {
            debug!(
                backend_id,
                latency_ms = latency.as_millis() as u64,
                token_count = c.token_count,
                "generation succeeded"
            );
            let response = Response::success(backend_id, c.text, c.token_count, latency);
            match c.completion_tokens {
                Some(n) => response.with_completion_tokens(n),
                None => response,
            }
        }
        Err(e) => {
            warn!(
                backend_id,
                error_kind = e.kind.as_str(),
                latency_ms = latency.as_millis() as u64,
                "generation failed: {}",
                e.message
            );
            Response::failure(backend_id, e.kind, e.message, latency)
        }
    }
}

pub(crate) fn malformed(what: &str) -> ErrorInfo {
    ErrorInfo::new(
        ErrorKind::BackendError,
        format!("malformed response body: missing {}", what),
    )
}

/// Factory: build the adapter for a configured backend.
pub fn create_adapter(
    config: &BackendConfig,
    security: Arc<dyn SecurityValidator>,
) -> Result<Arc<dyn BackendAdapter>> {
    let adapter: Arc<dyn BackendAdapter> = match config.kind {
        BackendKind::Ollama => Arc::new(OllamaAdapter::new(config.clone(), security)?),
        BackendKind::OpenAi => Arc::new(OpenAiAdapter::new(config.clone(), security)?),
        BackendKind::Gemini => Arc::new(GeminiAdapter::new(config.clone(), security)?),
        BackendKind::Watsonx => Arc::new(WatsonxAdapter::new(
            config.clone(),
            security,
            TokenCache::shared(),
        )?),
    };
    Ok(adapter)
}

/// Adapters addressable by backend id, in registration order.
#[derive(Debug, Default, Clone)]
pub struct BackendRegistry {
    adapters: HashMap<String, Arc<dyn BackendAdapter>>,
    order: Vec<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(
        config: &OrchestratorConfig,
        security: Arc<dyn SecurityValidator>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for backend in &config.backends {
            registry.register(create_adapter(backend, security.clone())?);
        }
        Ok(registry)
    }

    /// Add or replace the adapter registered under its backend id.
    pub fn register(&mut self, adapter: Arc<dyn BackendAdapter>) {
        let id = adapter.backend_id().to_string();
        if self.adapters.insert(id.clone(), adapter).is_none() {
            self.order.push(id);
        }
    }

    pub fn get(&self, backend_id: &str) -> Result<Arc<dyn BackendAdapter>> {
        self.adapters
            .get(backend_id)
            .cloned()
            .ok_or_else(|| Error::UnknownBackend(backend_id.to_string()))
    }

    pub fn contains(&self, backend_id: &str) -> bool {
        self.adapters.contains_key(backend_id)
    }

    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `validate_config` of every adapter, in registration order.
    pub fn validate_all(&self) -> Vec<(String, bool, String)> {
        self.order
            .iter()
            .filter_map(|id| self.adapters.get(id))
            .map(|a| {
                let (ok, msg) = a.validate_config();
                (a.backend_id().to_string(), ok, msg)
            })
            .collect()
    }
}
