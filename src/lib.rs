//! # omni-orchestrator
//!
//! 多后端大模型编排核心：统一适配器、响应缓存、并发控制与集成聚合。
//!
//! Multi-backend LLM orchestration core. One prompt can be sent to a single
//! backend, to many backends as a batch, or to an ensemble whose answers are
//! reduced into one result.
//!
//! ## Overview
//!
//! - **Uniform adapters**: local Ollama, OpenAI, Gemini and watsonx behind one
//!   [`drivers::BackendAdapter`] trait; failures are data, never panics.
//! - **Response cache**: content-addressed keys with TTL, an in-process LRU
//!   tier and an optional Redis tier that degrades to a miss when unreachable.
//! - **Bounded concurrency**: at most `K` backend calls in flight, with retry,
//!   per-backend rate limits and deadlines that always release their slot.
//! - **Ensembles**: best-of-N, voting, weighted average and consensus.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use omni_orchestrator::{EnsemblePreset, OrchestratorBuilder, OrchestratorConfig};
//!
//! #[tokio::main]
//! async fn main() -> omni_orchestrator::Result<()> {
//!     let orchestrator = OrchestratorBuilder::new()
//!         .with_config(OrchestratorConfig::workbench())
//!         .build()
//!         .await?;
//!
//!     let result = orchestrator
//!         .generate_preset("Write a Kubernetes deployment for nginx", EnsemblePreset::Balanced)
//!         .await?;
//!     println!("{} (agreement {:.2})", result.final_text, result.agreement_score);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Request, Response and the failure taxonomy |
//! | [`config`] | YAML configuration with environment overrides |
//! | [`security`] | Credential decryption and path/command checks |
//! | [`drivers`] | Backend adapters and the adapter registry |
//! | [`transport`] | Shared HTTP client and status classification |
//! | [`cache`] | Response cache with in-process and Redis tiers |
//! | [`resilience`] | Retry state machine and token-bucket rate limiter |
//! | [`batch`] | Concurrency controller |
//! | [`ensemble`] | Ensemble strategies, scoring and presets |
//! | [`client`] | The [`Orchestrator`] facade and its builder |

pub mod batch;
pub mod cache;
pub mod client;
pub mod config;
pub mod drivers;
pub mod ensemble;
pub mod resilience;
pub mod security;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use batch::{ConcurrencyController, SlotSnapshot};
pub use cache::{CacheKey, CacheStats, CacheStore};
pub use client::{Orchestrator, OrchestratorBuilder};
pub use config::{BackendConfig, BackendKind, OrchestratorConfig};
pub use drivers::{BackendAdapter, BackendRegistry};
pub use ensemble::{
    EnsembleConfig, EnsembleMember, EnsemblePreset, EnsembleResult, EnsembleStrategy,
};
pub use security::{SecurityValidator, StandardSecurity, StaticSecurity};
pub use types::{ErrorInfo, ErrorKind, GenerationParams, Request, Response};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
