//! Uniform adapter response and the failure taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Classified failure kinds.
///
/// Adapter-level kinds (`Network` .. `BackendError`) travel inside failed
/// [`Response`]s. `CacheUnavailable` is only ever logged, `Disagreement`
/// only appears on ensemble results, and `ConfigInvalid` mirrors the fatal
/// startup error so it can be reported uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    Auth,
    RateLimited,
    BackendError,
    CacheUnavailable,
    Disagreement,
    ConfigInvalid,
}

impl ErrorKind {
    /// Transient kinds that may heal on their own and are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimited
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::BackendError => "backend_error",
            ErrorKind::CacheUnavailable => "cache_unavailable",
            ErrorKind::Disagreement => "disagreement",
            ErrorKind::ConfigInvalid => "config_invalid",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of one adapter call.
///
/// Failures are data: `succeeded == false` and `error` describes why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub backend_id: String,
    pub text: String,
    pub token_count: u32,
    /// Generated tokens alone. `token_count` may include the prompt on
    /// hosted backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    pub succeeded: bool,
    pub error: Option<ErrorInfo>,
}

impl Response {
    pub fn success(
        backend_id: impl Into<String>,
        text: impl Into<String>,
        token_count: u32,
        latency: Duration,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            text: text.into(),
            token_count,
            completion_tokens: None,
            latency,
            succeeded: true,
            error: None,
        }
    }

    pub fn failure(
        backend_id: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
        latency: Duration,
    ) -> Self {
        Self {
            backend_id: backend_id.into(),
            text: String::new(),
            token_count: 0,
            completion_tokens: None,
            latency,
            succeeded: false,
            error: Some(ErrorInfo::new(kind, message)),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn with_completion_tokens(mut self, completion_tokens: u32) -> Self {
        self.completion_tokens = Some(completion_tokens);
        self
    }

    /// Tokens spent on the answer itself, for budget checks.
    pub fn generated_tokens(&self) -> u32 {
        self.completion_tokens.unwrap_or(self.token_count)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::Network.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(!ErrorKind::Auth.is_retryable());
        assert!(!ErrorKind::BackendError.is_retryable());
        assert!(!ErrorKind::Disagreement.is_retryable());
    }

    #[test]
    fn test_failure_shape() {
        let r = Response::failure("gemini", ErrorKind::Auth, "bad key", Duration::ZERO);
        assert!(!r.succeeded);
        assert!(r.text.is_empty());
        assert_eq!(r.error_kind(), Some(ErrorKind::Auth));
        assert_eq!(r.error.unwrap().to_string(), "auth: bad key");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let v = serde_json::to_value(ErrorKind::RateLimited).unwrap();
        assert_eq!(v, serde_json::json!("rate_limited"));
    }

    #[test]
    fn test_latency_serialized_as_millis() {
        let r = Response::success("ollama", "ok", 3, Duration::from_millis(1500));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["latency"], 1500);
        let back: Response = serde_json::from_value(v).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn test_generated_tokens_prefers_completion_count() {
        let r = Response::success("openai", "ok", 2400, Duration::ZERO);
        assert_eq!(r.generated_tokens(), 2400);
        let r = r.with_completion_tokens(150);
        assert_eq!(r.generated_tokens(), 150);
        assert_eq!(r.token_count, 2400);

        // entries cached before the field existed still decode
        let v = serde_json::json!({
            "backend_id": "openai", "text": "ok", "token_count": 5,
            "latency": 10, "succeeded": true, "error": null
        });
        let back: Response = serde_json::from_value(v).unwrap();
        assert_eq!(back.completion_tokens, None);
    }
}
