//! Retry policy for transient backend failures.
//!
//! Each call moves through `Attempting → (Backoff → Attempting)* →
//! Succeeded | Exhausted`. Only kinds for which
//! [`ErrorKind::is_retryable`](crate::types::ErrorKind::is_retryable) holds
//! are retried.

use rand::Rng;
use std::time::Duration;

use crate::config::RetrySettings;
use crate::types::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// About to issue attempt `attempt` (0-based).
    Attempting { attempt: u32 },
    /// Waiting `delay` before attempt `attempt`.
    Backoff { attempt: u32, delay: Duration },
    Succeeded,
    /// Failed with a non-retryable kind or out of retries.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    pub fn from_settings(s: &RetrySettings) -> Self {
        Self {
            max_retries: s.max_retries,
            base_delay: Duration::from_millis(s.base_delay_ms),
            max_delay: Duration::from_millis(s.max_delay_ms),
            jitter: s.jitter,
        }
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// `base * 2^attempt`, capped at `max_delay`. With jitter the delay is
    /// drawn uniformly from the upper half of that value.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let capped = self.base_delay.saturating_mul(factor).min(self.max_delay);
        if !self.jitter || capped.is_zero() {
            return capped;
        }
        let ms = capped.as_millis() as u64;
        let low = ms / 2;
        Duration::from_millis(rand::thread_rng().gen_range(low..=ms))
    }

    /// Next state after attempt `attempt` produced `response`.
    pub fn next(&self, attempt: u32, response: &Response) -> RetryState {
        if response.succeeded {
            return RetryState::Succeeded;
        }
        let retryable = response
            .error_kind()
            .map(|k| k.is_retryable())
            .unwrap_or(false);
        if retryable && attempt < self.max_retries {
            RetryState::Backoff {
                attempt: attempt + 1,
                delay: self.backoff_delay(attempt),
            }
        } else {
            RetryState::Exhausted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    fn policy() -> RetryPolicy {
        RetryPolicy::default().with_jitter(false)
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let p = policy();
        assert_eq!(p.backoff_delay(0), Duration::from_millis(500));
        assert_eq!(p.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(p.backoff_delay(3), Duration::from_millis(4000));
        assert_eq!(p.backoff_delay(10), Duration::from_millis(8000));
        assert_eq!(p.backoff_delay(40), Duration::from_millis(8000));
    }

    #[test]
    fn test_jitter_stays_in_upper_half() {
        let p = RetryPolicy::default();
        for _ in 0..50 {
            let d = p.backoff_delay(1);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000));
        }
    }

    #[test]
    fn test_transitions() {
        let p = policy();
        let ok = Response::success("b", "t", 1, Duration::ZERO);
        assert_eq!(p.next(0, &ok), RetryState::Succeeded);

        let timeout = Response::failure("b", ErrorKind::Timeout, "slow", Duration::ZERO);
        assert_eq!(
            p.next(0, &timeout),
            RetryState::Backoff {
                attempt: 1,
                delay: Duration::from_millis(500)
            }
        );
        assert_eq!(p.next(3, &timeout), RetryState::Exhausted);

        let auth = Response::failure("b", ErrorKind::Auth, "denied", Duration::ZERO);
        assert_eq!(p.next(0, &auth), RetryState::Exhausted);
    }

    #[test]
    fn test_none_never_retries() {
        let p = RetryPolicy::none();
        let net = Response::failure("b", ErrorKind::Network, "reset", Duration::ZERO);
        assert_eq!(p.next(0, &net), RetryState::Exhausted);
    }
}
