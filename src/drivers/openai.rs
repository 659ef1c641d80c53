//! Hosted chat-completions backend.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;

use super::{finish, malformed, AdapterContext, BackendAdapter, Completion};
use crate::config::{BackendConfig, BackendKind};
use crate::security::SecurityValidator;
use crate::types::{ErrorInfo, Request, Response};
use crate::Result;

pub const SYSTEM_PROMPT: &str = "You are an expert DevOps architect.";

#[derive(Debug)]
pub struct OpenAiAdapter {
    ctx: AdapterContext,
}

impl OpenAiAdapter {
    pub fn new(config: BackendConfig, security: Arc<dyn SecurityValidator>) -> Result<Self> {
        Ok(Self {
            ctx: AdapterContext::new(config, security)?,
        })
    }

    pub(crate) fn build_body(model: &str, request: &Request) -> Value {
        json!({
            "model": model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": request.prompt },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        })
    }

    pub(crate) fn parse_body(body: &Value) -> std::result::Result<Completion, ErrorInfo> {
        let text = body
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| malformed("choices[0].message.content"))?;
        let token_count = body
            .pointer("/usage/total_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let completion_tokens = body
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32);
        Ok(Completion {
            text: text.to_string(),
            token_count,
            completion_tokens,
        })
    }
}

#[async_trait]
impl BackendAdapter for OpenAiAdapter {
    fn backend_id(&self) -> &str {
        &self.ctx.config.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn default_model(&self) -> &str {
        &self.ctx.config.default_model
    }

    async fn generate(&self, request: &Request) -> Response {
        let started = Instant::now();
        let outcome = async {
            let key = self.ctx.credential()?;
            let url = format!("{}/chat/completions", self.ctx.base_url());
            let body = Self::build_body(self.ctx.model_for(request), request);
            let v = self
                .ctx
                .transport
                .post_json(&url, &body, Some(key.expose()), &[])
                .await?;
            Self::parse_body(&v)
        }
        .await;
        finish(self.backend_id(), started, outcome)
    }

    fn validate_config(&self) -> (bool, String) {
        self.ctx.check_credential()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GenerationParams;

    #[test]
    fn test_build_body_has_system_prompt() {
        let req = Request::new("k8s manifest", "openai", "gpt-4o", GenerationParams::new(0.7, 2000));
        let body = OpenAiAdapter::build_body("gpt-4o", &req);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], SYSTEM_PROMPT);
        assert_eq!(body["messages"][1]["content"], "k8s manifest");
        assert_eq!(body["max_tokens"], 2000);
    }

    #[test]
    fn test_parse_body() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "apiVersion: v1" } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 5, "total_tokens": 17 }
        });
        let c = OpenAiAdapter::parse_body(&body).unwrap();
        assert_eq!(c.text, "apiVersion: v1");
        assert_eq!(c.token_count, 17);
        assert_eq!(c.completion_tokens, Some(5));
        assert!(OpenAiAdapter::parse_body(&json!({"choices": []})).is_err());
    }
}
