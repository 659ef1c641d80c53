//! Google Gemini `generateContent` backend.
//!
//! The API key travels in the `x-goog-api-key` header so it never becomes
//! part of a URL; all text parts of the first candidate are concatenated.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;

use super::{finish, malformed, AdapterContext, BackendAdapter, Completion};
use crate::config::{BackendConfig, BackendKind};
use crate::security::SecurityValidator;
use crate::types::{ErrorInfo, ErrorKind, Request, Response};
use crate::Result;

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug)]
pub struct GeminiAdapter {
    ctx: AdapterContext,
}

impl GeminiAdapter {
    pub fn new(config: BackendConfig, security: Arc<dyn SecurityValidator>) -> Result<Self> {
        Ok(Self {
            ctx: AdapterContext::new(config, security)?,
        })
    }

    pub(crate) fn build_body(request: &Request) -> Value {
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            }
        })
    }

    pub(crate) fn parse_body(body: &Value) -> std::result::Result<Completion, ErrorInfo> {
        let candidate = body
            .pointer("/candidates/0")
            .ok_or_else(|| match body.pointer("/promptFeedback/blockReason") {
                Some(reason) => ErrorInfo::new(
                    ErrorKind::BackendError,
                    format!("prompt blocked: {}", reason),
                ),
                None => malformed("candidates[0]"),
            })?;
        let parts = candidate
            .pointer("/content/parts")
            .and_then(|v| v.as_array())
            .ok_or_else(|| malformed("candidates[0].content.parts"))?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();
        let token_count = body
            .pointer("/usageMetadata/totalTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let completion_tokens = body
            .pointer("/usageMetadata/candidatesTokenCount")
            .and_then(|v| v.as_u64())
            .map(|n| n as u32);
        Ok(Completion {
            text,
            token_count,
            completion_tokens,
        })
    }
}

#[async_trait]
impl BackendAdapter for GeminiAdapter {
    fn backend_id(&self) -> &str {
        &self.ctx.config.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Gemini
    }

    fn default_model(&self) -> &str {
        &self.ctx.config.default_model
    }

    async fn generate(&self, request: &Request) -> Response {
        let started = Instant::now();
        let outcome = async {
            let key = self.ctx.credential()?;
            let url = format!(
                "{}/models/{}:generateContent",
                self.ctx.base_url(),
                self.ctx.model_for(request),
            );
            let v = self
                .ctx
                .transport
                .post_json(
                    &url,
                    &Self::build_body(request),
                    None,
                    &[(API_KEY_HEADER, key.expose())],
                )
                .await
                // some error bodies echo the key back
                .map_err(|e| ErrorInfo::new(e.kind, e.message.replace(key.expose(), "***")))?;
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
    fn test_build_body() {
        let req = Request::new("Explain Terraform state", "gemini", "", GenerationParams::new(0.5, 2048));
        let body = GeminiAdapter::build_body(&req);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Explain Terraform state");
        assert_eq!(body["generationConfig"]["temperature"], 0.5);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn test_parse_body_joins_parts() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello, " }, { "text": "world" }] } }],
            "usageMetadata": { "promptTokenCount": 6, "candidatesTokenCount": 3, "totalTokenCount": 9 }
        });
        let c = GeminiAdapter::parse_body(&body).unwrap();
        assert_eq!(c.text, "Hello, world");
        assert_eq!(c.token_count, 9);
        assert_eq!(c.completion_tokens, Some(3));
    }

    #[test]
    fn test_parse_body_blocked_prompt() {
        let body = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = GeminiAdapter::parse_body(&body).unwrap_err();
        assert!(err.message.contains("SAFETY"));
    }
}
