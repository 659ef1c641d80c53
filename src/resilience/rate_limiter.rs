use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub rps: f64,
    pub burst: f64,
    pub tokens: f64,
    /// Estimated wait time until a token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Tokens per second. Zero disables limiting.
    pub rps: f64,
    /// Maximum burst size (tokens).
    pub burst: f64,
}

impl RateLimiterConfig {
    pub fn new() -> Self {
        Self {
            rps: 10.0,
            burst: 10.0,
        }
    }

    pub fn from_rps(rps: f64) -> Option<Self> {
        if !rps.is_finite() || rps < 0.0 {
            return None;
        }
        Some(Self {
            rps,
            burst: rps.max(1.0), // one second worth, at least 1
        })
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.burst = tokens as f64;
        self
    }

    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.rps = rate;
        self
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last: Instant,
    /// Set after the backend itself reported rate limiting.
    blocked_until: Option<Instant>,
}

/// Per-backend token bucket, acquired before a concurrency slot so a
/// throttled backend never sits on a slot while it waits.
#[derive(Debug)]
pub struct RateLimiter {
    cfg: RateLimiterConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        let state = Mutex::new(State {
            tokens: cfg.burst,
            last: Instant::now(),
            blocked_until: None,
        });
        Self { cfg, state }
    }

    fn refill_locked(cfg: &RateLimiterConfig, st: &mut State) {
        let now = Instant::now();
        let elapsed = now.duration_since(st.last).as_secs_f64();
        if elapsed > 0.0 {
            st.tokens = (st.tokens + elapsed * cfg.rps).min(cfg.burst);
            st.last = now;
        }
    }

    /// Acquire one token (may sleep).
    pub async fn acquire(&self) {
        let cfg = &self.cfg;
        loop {
            let wait = {
                let mut st = self.state.lock().await;
                let now = Instant::now();
                match st.blocked_until {
                    Some(until) if until > now => until.duration_since(now),
                    _ => {
                        st.blocked_until = None;
                        if cfg.rps <= 0.0 {
                            return;
                        }
                        Self::refill_locked(cfg, &mut st);
                        if st.tokens >= 1.0 {
                            st.tokens -= 1.0;
                            return;
                        }
                        Duration::from_secs_f64((1.0 - st.tokens) / cfg.rps)
                    }
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Try to acquire a token without waiting.
    pub async fn try_acquire(&self) -> bool {
        let cfg = &self.cfg;
        let mut st = self.state.lock().await;
        if st.blocked_until.map(|u| u > Instant::now()).unwrap_or(false) {
            return false;
        }
        if cfg.rps <= 0.0 {
            return true;
        }
        Self::refill_locked(cfg, &mut st);
        if st.tokens >= 1.0 {
            st.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Hold back every caller for `duration`, e.g. after a 429.
    pub async fn block_for(&self, duration: Duration) {
        let mut st = self.state.lock().await;
        let until = Instant::now() + duration;
        st.blocked_until = Some(st.blocked_until.map_or(until, |u| u.max(until)));
    }

    pub async fn snapshot(&self) -> RateLimiterSnapshot {
        let cfg = &self.cfg;
        let mut st = self.state.lock().await;
        let now = Instant::now();

        let mut wait_ms = st
            .blocked_until
            .filter(|until| *until > now)
            .map(|until| until.duration_since(now).as_millis() as u64);

        if cfg.rps > 0.0 {
            Self::refill_locked(cfg, &mut st);
            if st.tokens < 1.0 {
                let local_wait_ms = ((1.0 - st.tokens) / cfg.rps * 1000.0) as u64;
                wait_ms = Some(wait_ms.unwrap_or(0).max(local_wait_ms));
            }
        }

        RateLimiterSnapshot {
            rps: cfg.rps,
            burst: cfg.burst,
            tokens: st.tokens,
            estimated_wait_ms: wait_ms,
        }
    }
}
