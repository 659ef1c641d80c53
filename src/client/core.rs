use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::batch::{ConcurrencyController, SlotSnapshot};
use crate::cache::{CacheKey, CacheStats, CacheStore, SingleFlight};
use crate::config::OrchestratorConfig;
use crate::ensemble::{
    EnsembleAggregator, EnsembleConfig, EnsemblePreset, EnsembleResult, EnsembleStrategy,
};
use crate::security::SecurityValidator;
use crate::types::{ErrorKind, GenerationParams, Request, Response};
use crate::{Error, Result};

/// Cache-aware entry point over the controller and the aggregator.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Orchestrator {
    pub(crate) config: Arc<OrchestratorConfig>,
    pub(crate) controller: ConcurrencyController,
    pub(crate) aggregator: EnsembleAggregator,
    pub(crate) cache: Arc<CacheStore>,
    pub(crate) inflight: SingleFlight,
    pub(crate) security: Arc<dyn SecurityValidator>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backends", &self.controller.registry().ids())
            .field("slots", &self.controller.slots())
            .field("cache", &self.cache.backend_name())
            .finish()
    }
}

impl Orchestrator {
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Sampling parameters from configuration.
    pub fn default_params(&self) -> GenerationParams {
        self.config.default_params()
    }

    /// Single-backend generation.
    ///
    /// Backend failures come back as a failed [`Response`]; `Err` is reserved
    /// for an unknown backend or invalid parameters. Concurrent calls for the
    /// same request share one backend call.
    pub async fn generate(
        &self,
        prompt: &str,
        backend_id: &str,
        model: &str,
        params: GenerationParams,
    ) -> Result<Response> {
        let request = Request::new(prompt, backend_id, model, params);
        request.validate()?;
        let adapter = self.controller.registry().get(backend_id)?;

        let key = self.cache.key_for(&request);
        if let Some(hit) = self.cache.get(&key).await {
            debug!(backend = backend_id, key = %key.hash, "served from cache");
            return Ok(hit);
        }

        let (adapter, request, key) = (&adapter, &request, &key);
        let response = self
            .inflight
            .run(&key.hash, move || async move {
                let response = self.controller.run(adapter, request).await;
                if response.succeeded {
                    self.cache
                        .set(key, &response, self.cache.default_ttl())
                        .await;
                }
                response
            })
            .await;
        Ok(response)
    }

    /// Order-preserving batch: `out[i]` answers `requests[i]`.
    pub async fn generate_batch(&self, requests: &[Request]) -> Result<Vec<Response>> {
        self.cached_batch(requests, self.config.batch_size, None).await
    }

    /// Like [`generate_batch`](Self::generate_batch); returns
    /// [`Error::Cancelled`] once `cancel` fires. Windows already answered
    /// stay cached.
    pub async fn generate_batch_with_cancel(
        &self,
        requests: &[Request],
        cancel: &CancellationToken,
    ) -> Result<Vec<Response>> {
        self.cached_batch(requests, self.config.batch_size, Some(cancel))
            .await
    }

    /// Query every member of `config` and reduce with `strategy`.
    ///
    /// Members fan out together regardless of `batch_size`; the slot count
    /// still bounds how many run at once.
    pub async fn generate_ensemble(
        &self,
        prompt: &str,
        config: &EnsembleConfig,
        strategy: EnsembleStrategy,
    ) -> Result<EnsembleResult> {
        config.validate()?;
        let requests = EnsembleAggregator::requests(prompt, config);
        let responses = self.cached_batch(&requests, requests.len(), None).await?;
        Ok(EnsembleAggregator::reduce(config, strategy, responses))
    }

    pub async fn generate_ensemble_with_cancel(
        &self,
        prompt: &str,
        config: &EnsembleConfig,
        strategy: EnsembleStrategy,
        cancel: &CancellationToken,
    ) -> Result<EnsembleResult> {
        config.validate()?;
        let requests = EnsembleAggregator::requests(prompt, config);
        let responses = self
            .cached_batch(&requests, requests.len(), Some(cancel))
            .await?;
        Ok(EnsembleAggregator::reduce(config, strategy, responses))
    }

    /// Run a named preset with its own strategy and the configured
    /// sampling parameters.
    pub async fn generate_preset(
        &self,
        prompt: &str,
        preset: EnsemblePreset,
    ) -> Result<EnsembleResult> {
        let config = preset.config().with_params(self.default_params());
        self.generate_ensemble(prompt, &config, preset.strategy())
            .await
    }

    /// Ensemble call that skips the cache entirely.
    pub async fn generate_ensemble_uncached(
        &self,
        prompt: &str,
        config: &EnsembleConfig,
        strategy: EnsembleStrategy,
    ) -> Result<EnsembleResult> {
        self.aggregator.generate(prompt, config, strategy).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn cache_clear(&self) {
        self.cache.clear().await;
        info!("cache cleared");
    }

    /// Drop the cached answer for one request, if any.
    pub async fn cache_invalidate(&self, request: &Request) -> bool {
        self.cache.delete(&self.cache.key_for(request)).await
    }

    /// `(backend_id, ok, message)` for every registered adapter.
    pub fn validate_backends(&self) -> Vec<(String, bool, String)> {
        self.controller.registry().validate_all()
    }

    pub fn backend_ids(&self) -> &[String] {
        self.controller.registry().ids()
    }

    /// Security collaborator used by the adapters, for path and command
    /// checks in surrounding layers.
    pub fn security(&self) -> &Arc<dyn SecurityValidator> {
        &self.security
    }

    pub fn slots(&self) -> SlotSnapshot {
        self.controller.slots()
    }

    pub fn controller(&self) -> &ConcurrencyController {
        &self.controller
    }

    /// Windows of `window` requests: cache lookup, one dispatch per distinct
    /// missing key, store successes, then merge back into request order.
    async fn cached_batch(
        &self,
        requests: &[Request],
        window: usize,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Response>> {
        for request in requests {
            request.validate()?;
            if !self.controller.registry().contains(&request.backend_id) {
                return Err(Error::UnknownBackend(request.backend_id.clone()));
            }
        }

        let batch_id = Uuid::new_v4();
        let window = window.max(1);
        let ttl = self.cache.default_ttl();
        let mut out: Vec<Response> = Vec::with_capacity(requests.len());

        for (w, chunk) in requests.chunks(window).enumerate() {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(Error::Cancelled("batch cancelled before completion".to_string()));
            }
            let keys: Vec<CacheKey> = chunk.iter().map(|r| self.cache.key_for(r)).collect();
            let cached = self.cache.get_many(&keys).await;

            // position in `to_send` answering each missing request
            let mut slot_of: HashMap<&str, usize> = HashMap::new();
            let mut to_send: Vec<Request> = Vec::new();
            let mut send_keys: Vec<&CacheKey> = Vec::new();
            let mut answer: Vec<Option<usize>> = vec![None; chunk.len()];
            for (i, hit) in cached.iter().enumerate() {
                if hit.is_some() {
                    continue;
                }
                let slot = *slot_of.entry(keys[i].hash.as_str()).or_insert_with(|| {
                    to_send.push(chunk[i].clone());
                    send_keys.push(&keys[i]);
                    to_send.len() - 1
                });
                answer[i] = Some(slot);
            }
            debug!(
                %batch_id,
                window = w,
                window_len = chunk.len(),
                misses = answer.iter().flatten().count(),
                dispatched = to_send.len(),
                "batch window"
            );

            let fresh = if to_send.is_empty() {
                Vec::new()
            } else {
                match cancel {
                    Some(token) => {
                        self.controller
                            .submit_batch_with_cancel(to_send, token)
                            .await?
                    }
                    None => self.controller.submit_batch(&to_send).await?,
                }
            };

            let to_cache: Vec<(CacheKey, Response)> = send_keys
                .iter()
                .zip(&fresh)
                .filter(|(_, r)| r.succeeded)
                .map(|(k, r)| ((*k).clone(), r.clone()))
                .collect();
            if !to_cache.is_empty() {
                self.cache.set_many(&to_cache, ttl).await;
            }

            for ((hit, slot), request) in cached.into_iter().zip(answer).zip(chunk) {
                let response = match (hit, slot) {
                    (Some(response), _) => response,
                    (None, Some(slot)) => fresh.get(slot).cloned().unwrap_or_else(|| {
                        missing_result(&request.backend_id)
                    }),
                    (None, None) => missing_result(&request.backend_id),
                };
                out.push(response);
            }
        }
        Ok(out)
    }
}

fn missing_result(backend_id: &str) -> Response {
    Response::failure(
        backend_id,
        ErrorKind::BackendError,
        "missing batch result",
        Duration::ZERO,
    )
}
