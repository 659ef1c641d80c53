//! Bounded-concurrency dispatcher.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::OrchestratorConfig;
use crate::drivers::{BackendAdapter, BackendRegistry};
use crate::resilience::{
    RateLimiter, RateLimiterConfig, RateLimiterSnapshot, RetryPolicy, RetryState,
};
use crate::types::{ErrorKind, Request, Response};
use crate::{Error, Result};

/// Point-in-time view of the slot pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSnapshot {
    pub max: usize,
    pub available: usize,
    pub in_use: usize,
}

/// Admits at most `K` adapter calls at once.
///
/// A call first waits on its backend's rate limiter, then on a slot. The slot
/// is held only for the adapter call itself (not during retry backoff) and is
/// released when the call returns, fails, times out or is dropped.
///
/// Cloning is cheap; clones share the same slot pool.
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    registry: Arc<BackendRegistry>,
    slots: Arc<Semaphore>,
    max_slots: usize,
    limiters: Arc<HashMap<String, Arc<RateLimiter>>>,
    timeouts: Arc<HashMap<String, Duration>>,
    default_timeout: Duration,
    retry: RetryPolicy,
}

impl ConcurrencyController {
    pub fn new(registry: Arc<BackendRegistry>, max_concurrent: usize) -> Self {
        let max_slots = max_concurrent.max(1);
        Self {
            registry,
            slots: Arc::new(Semaphore::new(max_slots)),
            max_slots,
            limiters: Arc::new(HashMap::new()),
            timeouts: Arc::new(HashMap::new()),
            default_timeout: Duration::from_secs(120),
            retry: RetryPolicy::none(),
        }
    }

    /// Slot count, retry policy, per-backend deadlines and rate limits from
    /// configuration.
    pub fn from_config(config: &OrchestratorConfig, registry: Arc<BackendRegistry>) -> Self {
        let mut limiters = HashMap::new();
        let mut timeouts = HashMap::new();
        for b in &config.backends {
            if let Some(cfg) = b.rate_limit.and_then(RateLimiterConfig::from_rps) {
                limiters.insert(b.id.clone(), Arc::new(RateLimiter::new(cfg)));
            }
            timeouts.insert(b.id.clone(), b.timeout());
        }
        Self {
            limiters: Arc::new(limiters),
            timeouts: Arc::new(timeouts),
            default_timeout: config.request_timeout(),
            retry: RetryPolicy::from_settings(&config.retry),
            ..Self::new(registry, config.max_concurrent_requests)
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_timeout(mut self, backend_id: impl Into<String>, timeout: Duration) -> Self {
        Arc::make_mut(&mut self.timeouts).insert(backend_id.into(), timeout);
        self
    }

    pub fn with_rate_limit(mut self, backend_id: impl Into<String>, cfg: RateLimiterConfig) -> Self {
        Arc::make_mut(&mut self.limiters).insert(backend_id.into(), Arc::new(RateLimiter::new(cfg)));
        self
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn slots(&self) -> SlotSnapshot {
        let available = self.slots.available_permits();
        SlotSnapshot {
            max: self.max_slots,
            available,
            in_use: self.max_slots.saturating_sub(available),
        }
    }

    /// Token-bucket state of a rate-limited backend.
    pub async fn rate_limit(&self, backend_id: &str) -> Option<RateLimiterSnapshot> {
        match self.limiters.get(backend_id) {
            Some(l) => Some(l.snapshot().await),
            None => None,
        }
    }

    /// One request through the slot pool. `Err` only for an unknown backend.
    pub async fn submit(&self, request: &Request) -> Result<Response> {
        let adapter = self.registry.get(&request.backend_id)?;
        Ok(self.run(&adapter, request).await)
    }

    /// All requests concurrently, bounded by the slot pool. Output is
    /// positional: `out[i]` answers `requests[i]` whatever the completion
    /// order.
    pub async fn submit_batch(&self, requests: &[Request]) -> Result<Vec<Response>> {
        let adapters = self.resolve(requests)?;
        debug!(
            batch_len = requests.len(),
            max_slots = self.max_slots,
            "dispatching batch"
        );
        Ok(join_all(
            adapters
                .iter()
                .zip(requests)
                .map(|(adapter, request)| self.run(adapter, request)),
        )
        .await)
    }

    /// Like [`submit_batch`](Self::submit_batch) but abandons the batch when
    /// `cancel` fires: requests that have not taken a slot are skipped, calls
    /// already in flight finish in the background and are discarded.
    pub async fn submit_batch_with_cancel(
        &self,
        requests: Vec<Request>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Response>> {
        let adapters = self.resolve(&requests)?;
        let backend_ids: Vec<String> = requests.iter().map(|r| r.backend_id.clone()).collect();
        let handles: Vec<_> = adapters
            .into_iter()
            .zip(requests)
            .map(|(adapter, request)| {
                let this = self.clone();
                let token = cancel.clone();
                tokio::spawn(async move { this.run_until(&adapter, &request, Some(&token)).await })
            })
            .collect();

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            results = join_all(handles) => Some(results),
        };
        let Some(results) = joined else {
            warn!("batch cancelled");
            return Err(Error::Cancelled("batch cancelled before completion".to_string()));
        };

        let mut out = Vec::with_capacity(results.len());
        for (joined, backend_id) in results.into_iter().zip(backend_ids) {
            match joined {
                Ok(Some(response)) => out.push(response),
                Ok(None) => {
                    return Err(Error::Cancelled("batch cancelled before completion".to_string()))
                }
                Err(e) => out.push(Response::failure(
                    backend_id,
                    ErrorKind::BackendError,
                    format!("adapter task failed: {}", e),
                    Duration::ZERO,
                )),
            }
        }
        Ok(out)
    }

    fn resolve(&self, requests: &[Request]) -> Result<Vec<Arc<dyn BackendAdapter>>> {
        requests
            .iter()
            .map(|r| self.registry.get(&r.backend_id))
            .collect()
    }

    pub(crate) async fn run(&self, adapter: &Arc<dyn BackendAdapter>, request: &Request) -> Response {
        match self.run_until(adapter, request, None).await {
            Some(r) => r,
            None => Response::failure(
                adapter.backend_id(),
                ErrorKind::BackendError,
                "call abandoned",
                Duration::ZERO,
            ),
        }
    }

    /// Drive the retry state machine. `None` means `cancel` fired before an
    /// attempt could start.
    async fn run_until(
        &self,
        adapter: &Arc<dyn BackendAdapter>,
        request: &Request,
        cancel: Option<&CancellationToken>,
    ) -> Option<Response> {
        let backend_id = adapter.backend_id();
        let mut state = RetryState::Attempting { attempt: 0 };
        let mut last: Option<Response> = None;
        loop {
            state = match state {
                RetryState::Attempting { attempt } => {
                    let permit = self.acquire_slot(backend_id, cancel).await?;
                    let response = self.call(adapter, request, permit).await;
                    let next = self.retry.next(attempt, &response);
                    last = Some(response);
                    next
                }
                RetryState::Backoff { attempt, delay } => {
                    let kind = last.as_ref().and_then(|r| r.error_kind());
                    debug!(
                        backend_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = kind.map(|k| k.as_str()).unwrap_or("none"),
                        "retrying after backoff"
                    );
                    if kind == Some(ErrorKind::RateLimited) {
                        if let Some(l) = self.limiters.get(backend_id) {
                            l.block_for(delay).await;
                        }
                    }
                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                biased;
                                _ = token.cancelled() => return None,
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                    RetryState::Attempting { attempt }
                }
                RetryState::Succeeded | RetryState::Exhausted => return last,
            };
        }
    }

    async fn acquire_slot(
        &self,
        backend_id: &str,
        cancel: Option<&CancellationToken>,
    ) -> Option<OwnedSemaphorePermit> {
        let wait = async {
            if let Some(l) = self.limiters.get(backend_id) {
                l.acquire().await;
            }
            self.slots.clone().acquire_owned().await.ok()
        };
        match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => None,
                permit = wait => permit,
            },
            None => wait.await,
        }
    }

    async fn call(
        &self,
        adapter: &Arc<dyn BackendAdapter>,
        request: &Request,
        permit: OwnedSemaphorePermit,
    ) -> Response {
        let backend_id = adapter.backend_id();
        let deadline = self
            .timeouts
            .get(backend_id)
            .copied()
            .unwrap_or(self.default_timeout);
        let started = Instant::now();
        let response = match tokio::time::timeout(deadline, adapter.generate(request)).await {
            Ok(r) => r,
            Err(_) => {
                warn!(
                    backend_id,
                    deadline_ms = deadline.as_millis() as u64,
                    error_kind = ErrorKind::Timeout.as_str(),
                    "call exceeded deadline"
                );
                Response::failure(
                    backend_id,
                    ErrorKind::Timeout,
                    format!("no response within {:?}", deadline),
                    started.elapsed(),
                )
            }
        };
        drop(permit);
        response
    }
}
