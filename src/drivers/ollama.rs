//! Local model runner (`/api/generate`, non-streaming).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;
use url::Url;

use super::{finish, malformed, AdapterContext, BackendAdapter, Completion};
use crate::config::{BackendConfig, BackendKind};
use crate::security::SecurityValidator;
use crate::types::{ErrorInfo, Request, Response};
use crate::Result;

#[derive(Debug)]
pub struct OllamaAdapter {
    ctx: AdapterContext,
}

impl OllamaAdapter {
    pub fn new(config: BackendConfig, security: Arc<dyn SecurityValidator>) -> Result<Self> {
        Ok(Self {
            ctx: AdapterContext::new(config, security)?,
        })
    }

    pub(crate) fn build_body(model: &str, request: &Request) -> Value {
        json!({
            "model": model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "num_predict": request.max_tokens,
                "temperature": request.temperature,
            }
        })
    }

    pub(crate) fn parse_body(body: &Value) -> std::result::Result<Completion, ErrorInfo> {
        let text = body
            .get("response")
            .and_then(|v| v.as_str())
            .ok_or_else(|| malformed("response"))?;
        // eval_count is absent when the model is served from prompt cache.
        let token_count = body
            .get("eval_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        Ok(Completion {
            text: text.to_string(),
            token_count,
            completion_tokens: Some(token_count),
        })
    }
}

#[async_trait]
impl BackendAdapter for OllamaAdapter {
    fn backend_id(&self) -> &str {
        &self.ctx.config.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn default_model(&self) -> &str {
        &self.ctx.config.default_model
    }

    async fn generate(&self, request: &Request) -> Response {
        let started = Instant::now();
        let url = format!("{}/api/generate", self.ctx.base_url());
        let body = Self::build_body(self.ctx.model_for(request), request);
        let outcome = match self.ctx.transport.post_json(&url, &body, None, &[]).await {
            Ok(v) => Self::parse_body(&v),
            Err(e) => Err(e),
        };
        finish(self.backend_id(), started, outcome)
    }

    fn validate_config(&self) -> (bool, String) {
        match Url::parse(&self.ctx.config.base_url) {
            Ok(_) => (true, "Ollama endpoint configured".to_string()),
            Err(e) => (false, format!("invalid Ollama base_url: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, GenerationParams};

    #[test]
    fn test_build_body() {
        let req = Request::new("hello", "ollama", "llama2", GenerationParams::new(0.3, 128));
        let body = OllamaAdapter::build_body("llama2", &req);
        assert_eq!(body["model"], "llama2");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 128);
        assert_eq!(body["options"]["temperature"], 0.3);
    }

    #[test]
    fn test_parse_body() {
        let c = OllamaAdapter::parse_body(&json!({"response": "FROM node:20", "eval_count": 42}))
            .unwrap();
        assert_eq!(c.text, "FROM node:20");
        assert_eq!(c.token_count, 42);

        let err = OllamaAdapter::parse_body(&json!({"done": true})).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BackendError);
    }
}
