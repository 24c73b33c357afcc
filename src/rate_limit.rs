use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter,
};

/// Per-identity quota store. `consume` spends one unit for `key` and reports
/// whether the request is still within quota.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn consume(&self, key: &str) -> bool;
}

// ── In-memory keyed limiter ──────────────────────────────────────────────────

type KeyedLimiter<C> =
    RateLimiter<String, DashMapStateStore<String>, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Process-local store backed by governor's keyed GCRA limiter. Each identity
/// may burst `points` requests; spent units come back one every
/// `window / points`, so a full quota is restored `window` after a burst.
pub struct MemoryRateLimiter<C: Clock = DefaultClock> {
    limiter: KeyedLimiter<C>,
}

impl MemoryRateLimiter {
    pub fn new(points: u32, window: Duration) -> Self {
        Self::with_clock(points, window, DefaultClock::default())
    }
}

impl<C: Clock> MemoryRateLimiter<C> {
    pub fn with_clock(points: u32, window: Duration, clock: C) -> Self {
        Self {
            limiter: RateLimiter::new(quota(points, window), DashMapStateStore::default(), clock),
        }
    }

    fn check(&self, key: &str) -> bool {
        self.limiter.check_key(&key.to_string()).is_ok()
    }

    /// Drop identities whose quota has fully replenished.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    pub fn tracked(&self) -> usize {
        self.limiter.len()
    }
}

fn quota(points: u32, window: Duration) -> Quota {
    let burst = NonZeroU32::new(points).unwrap_or(NonZeroU32::MIN);
    Quota::with_period(window / burst.get())
        .unwrap_or_else(|| Quota::per_minute(burst))
        .allow_burst(burst)
}

#[async_trait]
impl<C> RateLimitStore for MemoryRateLimiter<C>
where
    C: Clock + Send + Sync,
    C::Instant: Send + Sync,
{
    async fn consume(&self, key: &str) -> bool {
        let allowed = self.check(key);
        if !allowed {
            tracing::debug!(key, tracked = self.tracked(), "rate limit exhausted");
        }
        allowed
    }
}
