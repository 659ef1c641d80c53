//! Standalone binary to validate an orchestrator configuration and every
//! backend it describes. Exits non-zero when the configuration is unusable.

use anyhow::Context;
use omni_orchestrator::config::OrchestratorConfig;
use omni_orchestrator::drivers::BackendRegistry;
use omni_orchestrator::security::StandardSecurity;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("OMNI_CONFIG").ok());

    let config = match &path {
        Some(p) => {
            println!("Using configuration: {}", p);
            OrchestratorConfig::from_path(p)
                .with_context(|| format!("failed to load {}", p))?
        }
        None => {
            println!("No configuration given (argument or OMNI_CONFIG); checking workbench defaults");
            OrchestratorConfig::workbench()
        }
    }
    .apply_env_overrides();

    println!("\n=== Global settings ===");
    println!("  max_concurrent_requests: {}", config.max_concurrent_requests);
    println!("  batch_size: {}", config.batch_size);
    println!("  default_cache_ttl_secs: {}", config.default_cache_ttl_secs);

    if let Err(e) = config.validate() {
        println!("\n❌ {}", e);
        return Ok(ExitCode::FAILURE);
    }

    let registry = BackendRegistry::from_config(&config, Arc::new(StandardSecurity::new()))
        .context("failed to construct backend adapters")?;

    println!("\n=== Backends ===");
    let mut failures = 0usize;
    for (id, ok, message) in registry.validate_all() {
        if ok {
            println!("  {} ✅ {}", id, message);
        } else {
            failures += 1;
            println!("  {} ❌ {}", id, message);
        }
    }

    if failures > 0 {
        println!("\n{} of {} backend(s) failed validation", failures, registry.len());
        Ok(ExitCode::FAILURE)
    } else {
        println!("\nAll {} backend(s) valid", registry.len());
        Ok(ExitCode::SUCCESS)
    }
}
