//! Shared fixtures: a scripted in-process backend with call-count and
//! concurrency instrumentation.

#![allow(dead_code)]

use async_trait::async_trait;
use omni_orchestrator::config::{BackendKind, OrchestratorConfig};
use omni_orchestrator::drivers::BackendAdapter;
use omni_orchestrator::resilience::RetryPolicy;
use omni_orchestrator::types::{ErrorKind, Request, Response};
use omni_orchestrator::{Orchestrator, OrchestratorBuilder, StaticSecurity};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Reply {
    /// `"<backend>: <prompt>"`
    Echo,
    Text(String),
    Fail(ErrorKind),
}

#[derive(Debug)]
pub struct ScriptedAdapter {
    id: String,
    reply: Reply,
    delay: Duration,
    valid: bool,
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(id: &str, reply: Reply) -> Self {
        Self {
            id: id.to_string(),
            reply,
            delay: Duration::ZERO,
            valid: true,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn echo(id: &str) -> Self {
        Self::new(id, Reply::Echo)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn invalid(mut self) -> Self {
        self.valid = false;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendAdapter for ScriptedAdapter {
    fn backend_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    fn default_model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &Request) -> Response {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        match &self.reply {
            Reply::Echo => Response::success(
                &self.id,
                format!("{}: {}", self.id, request.prompt),
                7,
                self.delay,
            ),
            Reply::Text(t) => Response::success(&self.id, t.clone(), 7, self.delay),
            Reply::Fail(kind) => Response::failure(&self.id, *kind, "scripted failure", self.delay),
        }
    }

    fn validate_config(&self) -> (bool, String) {
        if self.valid {
            (true, "scripted backend ready".to_string())
        } else {
            (false, "scripted backend missing credential".to_string())
        }
    }
}

/// Adapters only, no configured backends, no retries, no sweeper.
pub async fn orchestrator(
    config: OrchestratorConfig,
    adapters: Vec<Arc<ScriptedAdapter>>,
) -> Orchestrator {
    let mut builder = OrchestratorBuilder::new()
        .with_config(config)
        .with_security(Arc::new(StaticSecurity::new()))
        .with_retry(RetryPolicy::none())
        .with_sweep_interval(Duration::ZERO);
    for a in adapters {
        builder = builder.with_adapter(a);
    }
    builder.build().await.expect("orchestrator builds")
}

pub fn config_with(max_concurrent: usize, batch_size: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        max_concurrent_requests: max_concurrent,
        batch_size,
        ..OrchestratorConfig::default()
    }
}
