//! 编排门面模块：对外暴露单后端、批量与集成生成接口。
//!
//! # Orchestration Facade
//!
//! [`Orchestrator`] wires the layers together for the surrounding
//! application:
//!
//! ```text
//! generate / generate_batch / generate_ensemble
//!        │
//!        ▼
//!   CacheStore ──hit──▶ Response
//!        │ miss
//!        ▼
//!   ConcurrencyController ──▶ BackendAdapter ──▶ backend
//!        │
//!        ▼
//!   EnsembleAggregator (ensemble calls only)
//! ```
//!
//! Build one with [`OrchestratorBuilder`]; building validates the
//! configuration and every adapter, so a missing credential is reported
//! before any request is attempted.
//!
//! ```rust,no_run
//! use omni_orchestrator::client::OrchestratorBuilder;
//! use omni_orchestrator::config::OrchestratorConfig;
//! use omni_orchestrator::types::GenerationParams;
//!
//! # async fn run() -> omni_orchestrator::Result<()> {
//! let orchestrator = OrchestratorBuilder::new()
//!     .with_config(OrchestratorConfig::workbench())
//!     .build()
//!     .await?;
//! let response = orchestrator
//!     .generate("Write a Dockerfile for a Node.js API", "ollama", "", GenerationParams::default())
//!     .await?;
//! println!("{}", response.text);
//! # Ok(())
//! # }
//! ```

mod builder;
mod core;

pub use builder::OrchestratorBuilder;
pub use core::Orchestrator;
