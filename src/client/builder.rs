use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::batch::ConcurrencyController;
use crate::cache::{CacheBackend, CacheConfig, CacheStore, SingleFlight};
use crate::client::core::Orchestrator;
use crate::config::OrchestratorConfig;
use crate::drivers::{BackendAdapter, BackendRegistry};
use crate::ensemble::EnsembleAggregator;
use crate::resilience::RetryPolicy;
use crate::security::{SecurityValidator, StandardSecurity};
use crate::{Error, ErrorContext, Result};

/// Builder for an [`Orchestrator`].
///
/// Configuration is read once here. `build` fails with a configuration error
/// when the config is malformed or any adapter reports itself unusable.
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    security: Option<Arc<dyn SecurityValidator>>,
    adapters: Vec<Arc<dyn BackendAdapter>>,
    remote_cache: Option<Box<dyn CacheBackend>>,
    retry: Option<RetryPolicy>,
    cache_ttl: Option<Duration>,
    sweep_interval: Option<Duration>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            security: None,
            adapters: Vec::new(),
            remote_cache: None,
            retry: None,
            cache_ttl: None,
            sweep_interval: None,
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Load YAML configuration and apply `OMNI_*` overrides.
    pub fn with_config_path(mut self, path: impl AsRef<std::path::Path>) -> Result<Self> {
        self.config = OrchestratorConfig::from_path(path)?.apply_env_overrides();
        Ok(self)
    }

    /// Defaults to [`StandardSecurity`] (keyring, then environment).
    pub fn with_security(mut self, security: Arc<dyn SecurityValidator>) -> Self {
        self.security = Some(security);
        self
    }

    /// Register an adapter that is not described by the configuration,
    /// replacing any configured backend with the same id.
    pub fn with_adapter(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Attach an external cache tier directly, bypassing `cache.redis_url`.
    pub fn with_remote_cache(mut self, remote: Box<dyn CacheBackend>) -> Self {
        self.remote_cache = Some(remote);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub async fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;
        let security = self
            .security
            .unwrap_or_else(|| Arc::new(StandardSecurity::new()));

        let mut registry = BackendRegistry::from_config(&self.config, security.clone())?;
        for adapter in self.adapters {
            registry.register(adapter);
        }
        if registry.is_empty() {
            warn!("orchestrator built without any backend");
        }

        let failures: Vec<String> = registry
            .validate_all()
            .into_iter()
            .filter(|(_, ok, _)| !ok)
            .map(|(id, _, msg)| format!("{}: {}", id, msg))
            .collect();
        if !failures.is_empty() {
            return Err(Error::configuration_with_context(
                format!("{} backend(s) failed validation", failures.len()),
                ErrorContext::new()
                    .with_field_path("backends")
                    .with_details(failures.join("; "))
                    .with_source("orchestrator_builder"),
            ));
        }

        let registry = Arc::new(registry);
        let mut controller = ConcurrencyController::from_config(&self.config, registry);
        if let Some(retry) = self.retry {
            controller = controller.with_retry(retry);
        }

        let mut cache_config = CacheConfig::from_orchestrator(&self.config);
        if let Some(ttl) = self.cache_ttl {
            cache_config = cache_config.with_ttl(ttl);
        }
        if let Some(interval) = self.sweep_interval {
            cache_config = cache_config.with_sweep_interval(interval);
        }
        let mut cache = CacheStore::connect(cache_config).await;
        if let Some(remote) = self.remote_cache {
            cache = cache.with_remote(remote);
        }

        info!(
            backends = controller.registry().len(),
            max_concurrent = self.config.max_concurrent_requests,
            batch_size = self.config.batch_size,
            cache = cache.backend_name(),
            "orchestrator ready"
        );

        Ok(Orchestrator {
            config: Arc::new(self.config),
            aggregator: EnsembleAggregator::new(controller.clone()),
            controller,
            cache: Arc::new(cache),
            inflight: SingleFlight::new(),
            security,
        })
    }
}
