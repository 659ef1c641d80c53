//! 弹性模式模块：提供限流器与重试策略等可靠性保障机制。
//!
//! # Resilience Primitives
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Token bucket applied per backend before a concurrency slot is taken |
//! | [`retry`] | Exponential backoff with jitter for transient failure kinds |
//!
//! ```rust
//! use omni_orchestrator::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
//!
//! let config = RateLimiterConfig::new()
//!     .with_max_tokens(5)
//!     .with_refill_rate(2.0);
//! let limiter = RateLimiter::new(config);
//! # let _ = limiter;
//! ```

pub mod rate_limiter;
pub mod retry;

pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
pub use retry::{RetryPolicy, RetryState};
