use crate::types::{ErrorInfo, ErrorKind};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::debug;

/// Thin wrapper over a pooled `reqwest::Client`.
///
/// Every call returns either the decoded JSON body or a classified
/// [`ErrorInfo`]; nothing here panics or propagates transport faults upward.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        // Minimal production-friendly defaults (env-overridable).
        let builder = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(
                env::var("OMNI_HTTP_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(10),
            ))
            .pool_max_idle_per_host(
                env::var("OMNI_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        let client = builder.build()?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST a JSON body and decode a JSON response.
    pub async fn post_json(
        &self,
        url: &str,
        body: &Value,
        bearer: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Result<Value, ErrorInfo> {
        let mut req = self.client.post(url).json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        Self::decode(req.send().await, url).await
    }

    /// POST an urlencoded form and decode a JSON response.
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Value, ErrorInfo> {
        let req = self
            .client
            .post(url)
            .header("accept", "application/json")
            .form(form);
        Self::decode(req.send().await, url).await
    }

    async fn decode(
        sent: Result<reqwest::Response, reqwest::Error>,
        url: &str,
    ) -> Result<Value, ErrorInfo> {
        let resp = sent.map_err(classify_reqwest_error)?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            debug!(
                http_status = status.as_u16(),
                url = redact_query(url),
                "backend returned error status"
            );
            let mut message = format!("HTTP {}: {}", status.as_u16(), truncate(&body, 300));
            if let Some(secs) = retry_after {
                message.push_str(&format!(" (retry-after {}s)", secs));
            }
            return Err(ErrorInfo::new(classify_status(status), message));
        }
        resp.json::<Value>().await.map_err(|e| {
            let e = e.without_url();
            if e.is_timeout() {
                ErrorInfo::new(ErrorKind::Timeout, e.to_string())
            } else {
                ErrorInfo::new(
                    ErrorKind::BackendError,
                    format!("malformed response body: {}", e),
                )
            }
        })
    }
}

/// Map a non-success HTTP status to the failure taxonomy.
pub fn classify_status(status: StatusCode) -> ErrorKind {
    match status.as_u16() {
        401 | 403 => ErrorKind::Auth,
        408 | 504 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimited,
        _ => ErrorKind::BackendError,
    }
}

/// Map a transport-level failure to the failure taxonomy. The request URL
/// is stripped from the message.
pub fn classify_reqwest_error(err: reqwest::Error) -> ErrorInfo {
    let err = err.without_url();
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_connect() || err.is_request() {
        ErrorKind::Network
    } else if let Some(status) = err.status() {
        classify_status(status)
    } else {
        ErrorKind::Network
    };
    ErrorInfo::new(kind, err.to_string())
}

/// URL for log fields: scheme, host and path only.
fn redact_query(url: &str) -> &str {
    url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url)
}

/// Best-effort parsing of `Retry-After`; only the `<seconds>` form is supported.
fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ErrorKind::Auth);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), ErrorKind::Auth);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorKind::RateLimited
        );
        assert_eq!(
            classify_status(StatusCode::GATEWAY_TIMEOUT),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            ErrorKind::BackendError
        );
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST),
            ErrorKind::BackendError
        );
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[test]
    fn test_redact_query() {
        assert_eq!(
            redact_query("https://g.example/models/m:generateContent?key=abc"),
            "https://g.example/models/m:generateContent"
        );
        assert_eq!(redact_query("http://h/a#frag"), "http://h/a");
        assert_eq!(redact_query("http://h/a"), "http://h/a");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let transport = HttpTransport::new(Duration::from_secs(2)).unwrap();
        // Port 9 (discard) on loopback is reliably closed in CI sandboxes.
        let err = transport
            .post_json(
                "http://127.0.0.1:9/unreachable?token=s3cret",
                &serde_json::json!({}),
                None,
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Network | ErrorKind::Timeout));
        assert!(!err.message.contains("s3cret"));
    }
}
