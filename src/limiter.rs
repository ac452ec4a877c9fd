//! Token-bucket rate limiter with minimum request spacing.
//!
//! Refill is computed lazily from elapsed time on every call; there is no
//! background timer. Concurrent callers share one bucket: waiters queue on
//! an async gate, so aggregate throughput is bounded across all scans that
//! use the same limiter.

use parking_lot::Mutex;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Extra sleep added to each refill wait so float rounding never leaves the
/// bucket a hair short after waking.
const WAIT_BUFFER: Duration = Duration::from_millis(10);

/// Floor for the refill rate so a misconfigured zero cannot stall forever.
const MIN_REFILL_RATE: f64 = 1e-3;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    /// Bucket capacity.
    pub max_tokens: f64,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Minimum gap between the end of one acquire and the next.
    pub min_delay: Duration,
}

/// Named rate presets, slowest to fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatePreset {
    Conservative,
    #[default]
    Standard,
    Aggressive,
    Burst,
}

impl RatePreset {
    pub fn config(&self) -> RateLimitConfig {
        match self {
            RatePreset::Conservative => RateLimitConfig {
                max_tokens: 5.0,
                refill_rate: 0.5,
                min_delay: Duration::from_millis(2000),
            },
            RatePreset::Standard => RateLimitConfig {
                max_tokens: 10.0,
                refill_rate: 1.0,
                min_delay: Duration::from_millis(1000),
            },
            RatePreset::Aggressive => RateLimitConfig {
                max_tokens: 20.0,
                refill_rate: 2.0,
                min_delay: Duration::from_millis(500),
            },
            RatePreset::Burst => RateLimitConfig {
                max_tokens: 30.0,
                refill_rate: 2.0,
                min_delay: Duration::from_millis(200),
            },
        }
    }
}

impl fmt::Display for RatePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RatePreset::Conservative => write!(f, "conservative"),
            RatePreset::Standard => write!(f, "standard"),
            RatePreset::Aggressive => write!(f, "aggressive"),
            RatePreset::Burst => write!(f, "burst"),
        }
    }
}

impl std::str::FromStr for RatePreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(RatePreset::Conservative),
            "standard" => Ok(RatePreset::Standard),
            "aggressive" => Ok(RatePreset::Aggressive),
            "burst" => Ok(RatePreset::Burst),
            _ => Err(anyhow::anyhow!("Unknown rate preset: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Limiter
// ---------------------------------------------------------------------------

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    last_request: Option<Instant>,
    total_requests: u64,
    throttled: u64,
}

impl BucketState {
    fn refill(&mut self, config: &RateLimitConfig, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * config.refill_rate).min(config.max_tokens);
        self.last_refill = now;
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterStats {
    pub total_requests: u64,
    pub throttled: u64,
    pub available_tokens: f64,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<BucketState>,
    gate: tokio::sync::Mutex<()>,
}

impl RateLimiter {
    /// New limiter starting with a full bucket.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BucketState {
                tokens: config.max_tokens,
                last_refill: Instant::now(),
                last_request: None,
                total_requests: 0,
                throttled: 0,
            }),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_preset(preset: RatePreset) -> Self {
        Self::new(preset.config())
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until `cost` tokens are available, then take them.
    ///
    /// Costs above the bucket capacity are clamped to the capacity, since
    /// the bucket could otherwise never satisfy them. A NaN cost is charged
    /// as a full bucket.
    pub async fn acquire(&self, cost: f64) {
        let cost = if cost.is_nan() {
            self.config.max_tokens
        } else {
            cost.clamp(0.0, self.config.max_tokens)
        };
        let _turn = self.gate.lock().await;

        // Minimum spacing from the previous request.
        let spacing_wait = {
            let state = self.state.lock();
            state.last_request.and_then(|last| {
                let ready_at = last + self.config.min_delay;
                ready_at.checked_duration_since(Instant::now())
            })
        };
        if let Some(wait) = spacing_wait {
            if !wait.is_zero() {
                debug!(wait_ms = wait.as_millis() as u64, "Enforcing minimum request spacing");
                tokio::time::sleep(wait).await;
            }
        }

        loop {
            let shortfall_wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                state.refill(&self.config, now);
                if state.tokens >= cost {
                    state.tokens -= cost;
                    state.total_requests += 1;
                    state.last_request = Some(now);
                    return;
                }
                state.throttled += 1;
                let shortfall = cost - state.tokens;
                Duration::from_secs_f64(shortfall / self.config.refill_rate.max(MIN_REFILL_RATE))
                    + WAIT_BUFFER
            };
            debug!(
                wait_ms = shortfall_wait.as_millis() as u64,
                "Rate limited, waiting for refill"
            );
            tokio::time::sleep(shortfall_wait).await;
        }
    }

    /// Whether `cost` tokens are available right now. Does not consume.
    pub fn can_acquire(&self, cost: f64) -> bool {
        let mut state = self.state.lock();
        state.refill(&self.config, Instant::now());
        state.tokens >= cost
    }

    /// Tokens available after a refill pass.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        state.refill(&self.config, Instant::now());
        state.tokens
    }

    /// Refill the bucket and forget the previous request time.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.tokens = self.config.max_tokens;
        state.last_refill = Instant::now();
        state.last_request = None;
    }

    pub fn stats(&self) -> LimiterStats {
        let mut state = self.state.lock();
        state.refill(&self.config, Instant::now());
        LimiterStats {
            total_requests: state.total_requests,
            throttled: state.throttled,
            available_tokens: state.tokens,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
