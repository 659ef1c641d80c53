//! Enterprise text-generation backend authenticated with short-lived IAM
//! tokens.
//!
//! The API key is exchanged for a bearer token at `auth_url`; the token is
//! kept in a [`TokenCache`] until shortly before it expires. A 401/403 from
//! the generation endpoint drops the cached token and the call is retried
//! once with a fresh one.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;

use super::{finish, malformed, AdapterContext, BackendAdapter, Completion, TokenCache};
use crate::config::{BackendConfig, BackendKind};
use crate::security::SecurityValidator;
use crate::types::{ErrorInfo, ErrorKind, Request, Response};
use crate::Result;

pub const DEFAULT_AUTH_URL: &str = "https://iam.cloud.ibm.com/identity/token";
pub const API_VERSION: &str = "2023-05-29";
const GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

#[derive(Debug)]
pub struct WatsonxAdapter {
    ctx: AdapterContext,
    tokens: Arc<TokenCache>,
}

impl WatsonxAdapter {
    pub fn new(
        config: BackendConfig,
        security: Arc<dyn SecurityValidator>,
        tokens: Arc<TokenCache>,
    ) -> Result<Self> {
        Ok(Self {
            ctx: AdapterContext::new(config, security)?,
            tokens,
        })
    }

    fn auth_url(&self) -> &str {
        self.ctx
            .config
            .auth_url
            .as_deref()
            .unwrap_or(DEFAULT_AUTH_URL)
    }

    fn token_key(&self) -> String {
        format!(
            "{}|{}",
            self.auth_url(),
            self.ctx.config.credential.as_deref().unwrap_or_default()
        )
    }

    pub(crate) fn build_body(model: &str, project_id: &str, request: &Request) -> Value {
        json!({
            "model_id": model,
            "input": format!("<s>[INST] {} [/INST]", request.prompt),
            "parameters": {
                "max_new_tokens": request.max_tokens,
                "temperature": request.temperature,
            },
            "project_id": project_id,
        })
    }

    pub(crate) fn parse_body(body: &Value) -> std::result::Result<Completion, ErrorInfo> {
        let result = body
            .pointer("/results/0")
            .ok_or_else(|| malformed("results[0]"))?;
        let text = result
            .get("generated_text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| malformed("results[0].generated_text"))?;
        let token_count = result
            .get("generated_token_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        Ok(Completion {
            text: text.to_string(),
            token_count,
            completion_tokens: Some(token_count),
        })
    }

    async fn exchange(&self, api_key: &str) -> std::result::Result<(String, Option<u64>), ErrorInfo> {
        let form = [("grant_type", GRANT_TYPE), ("apikey", api_key)];
        let body = self
            .ctx
            .transport
            .post_form(self.auth_url(), &form)
            .await
            .map_err(|e| {
                let kind = match e.kind {
                    ErrorKind::BackendError => ErrorKind::Auth,
                    other => other,
                };
                ErrorInfo::new(kind, format!("token exchange failed: {}", e.message))
            })?;
        let token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ErrorInfo::new(ErrorKind::Auth, "token exchange returned no access_token"))?;
        let expires_in = body.get("expires_in").and_then(|v| v.as_u64());
        Ok((token.to_string(), expires_in))
    }

    async fn call(&self, request: &Request) -> std::result::Result<Completion, ErrorInfo> {
        let project_id = self.ctx.config.project_id.as_deref().ok_or_else(|| {
            ErrorInfo::new(ErrorKind::ConfigInvalid, "watsonx project_id is not configured")
        })?;
        let api_key = self.ctx.credential()?;
        let key = self.token_key();
        let url = format!(
            "{}/ml/v1/text/generation?version={}",
            self.ctx.base_url(),
            API_VERSION
        );
        let body = Self::build_body(self.ctx.model_for(request), project_id, request);

        let mut attempt = 0;
        loop {
            let token = self
                .tokens
                .get_or_refresh(&key, || self.exchange(api_key.expose()))
                .await?;
            match self
                .ctx
                .transport
                .post_json(&url, &body, Some(&token), &[("accept", "application/json")])
                .await
            {
                Ok(v) => return Self::parse_body(&v),
                Err(e) if e.kind == ErrorKind::Auth && attempt == 0 => {
                    self.tokens.invalidate(&key, &token).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.kind == ErrorKind::Auth {
                        self.tokens.invalidate(&key, &token).await;
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl BackendAdapter for WatsonxAdapter {
    fn backend_id(&self) -> &str {
        &self.ctx.config.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Watsonx
    }

    fn default_model(&self) -> &str {
        &self.ctx.config.default_model
    }

    async fn generate(&self, request: &Request) -> Response {
        let started = Instant::now();
        let outcome = self.call(request).await;
        finish(self.backend_id(), started, outcome)
    }

    fn validate_config(&self) -> (bool, String) {
        let (ok, msg) = self.ctx.check_credential();
        if !ok {
            return (false, msg);
        }
        match self.ctx.config.project_id.as_deref() {
            Some(p) if !p.trim().is_empty() => (true, "watsonx credential and project configured".to_string()),
            _ => (false, "watsonx project_id is not configured".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::StaticSecurity;
    use crate::types::GenerationParams;

    fn adapter(project: Option<&str>) -> WatsonxAdapter {
        let mut cfg = BackendConfig::new(
            "watsonx",
            BackendKind::Watsonx,
            "https://us-south.ml.cloud.ibm.com",
            "meta-llama/llama-3-70b-instruct",
        )
        .with_credential("WATSONX_API_KEY");
        cfg.project_id = project.map(String::from);
        let sec = Arc::new(StaticSecurity::new().with_secret("WATSONX_API_KEY", "ibm-0123456789"));
        WatsonxAdapter::new(cfg, sec, Arc::new(TokenCache::new())).unwrap()
    }

    #[test]
    fn test_build_body_wraps_prompt() {
        let req = Request::new("helm chart", "watsonx", "", GenerationParams::new(0.7, 500));
        let body = WatsonxAdapter::build_body("m", "proj", &req);
        assert_eq!(body["input"], "<s>[INST] helm chart [/INST]");
        assert_eq!(body["parameters"]["max_new_tokens"], 500);
        assert_eq!(body["project_id"], "proj");
    }

    #[test]
    fn test_parse_body() {
        let body = json!({
            "results": [{ "generated_text": "resource \"aws_s3_bucket\"", "generated_token_count": 12 }]
        });
        let c = WatsonxAdapter::parse_body(&body).unwrap();
        assert_eq!(c.token_count, 12);
        assert!(WatsonxAdapter::parse_body(&json!({ "results": [] })).is_err());
    }

    #[test]
    fn test_validate_config_requires_project() {
        assert!(adapter(Some("proj-1")).validate_config().0);
        let (ok, msg) = adapter(None).validate_config();
        assert!(!ok);
        assert!(msg.contains("project_id"));
    }

    #[tokio::test]
    async fn test_missing_project_is_config_invalid_response() {
        let req = Request::new("x", "watsonx", "", GenerationParams::default());
        let resp = adapter(None).generate(&req).await;
        assert!(!resp.succeeded);
        assert_eq!(resp.error_kind(), Some(ErrorKind::ConfigInvalid));
    }
}
