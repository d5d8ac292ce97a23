use std::{num::NonZeroU32, time::Duration};

use governor::{clock::DefaultClock, state::InMemoryState, Jitter, Quota, RateLimiter};
use serde::Deserialize;

pub type InMemoryLimiter = RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>;

/// Per-endpoint request budget. Defaults are conservative enough for public RPC nodes.
#[derive(Deserialize, Debug, Clone, serde_derive_default::Default)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_second")]
    pub per_second: NonZeroU32,
    #[serde(default)]
    pub jitter: JitterConfig,
}

#[derive(Deserialize, Debug, Clone, serde_derive_default::Default)]
pub struct JitterConfig {
    #[serde(with = "humantime_serde", default = "default_jitter_min")]
    min: Duration,
    #[serde(with = "humantime_serde", default = "default_jitter_interval")]
    interval: Duration,
}

pub fn default_jitter_min() -> Duration {
    Duration::ZERO
}

pub fn default_jitter_interval() -> Duration {
    Duration::from_millis(20)
}

pub fn default_per_second() -> NonZeroU32 {
    NonZeroU32::new(10).expect("invariant: non-zero literal")
}

impl RateLimitConfig {
    pub fn limiter(&self) -> Limiter {
        Limiter {
            inner: RateLimiter::direct(Quota::per_second(self.per_second)),
            jitter: Jitter::new(self.jitter.min, self.jitter.interval),
        }
    }
}

pub struct Limiter {
    inner: InMemoryLimiter,
    jitter: Jitter,
}

impl Limiter {
    pub async fn until_ready(&self) {
        self.inner.until_ready_with_jitter(self.jitter).await;
    }
}

/// Gives access to the wrapped client only after the limiter lets a request through.
pub struct LimiterGuard<T> {
    inner: T,
    limiter: Limiter,
}

impl<T> LimiterGuard<T> {
    pub fn new(val: T, limiter: Limiter) -> Self {
        Self {
            inner: val,
            limiter,
        }
    }

    pub async fn use_single(&self) -> &T {
        self.limiter.until_ready().await;
        &self.inner
    }
}
