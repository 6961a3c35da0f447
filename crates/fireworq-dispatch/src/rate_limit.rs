//! Token-bucket dispatch rate limiting over `governor`, grounded on
//! `Xevion-banner`'s `BannerRateLimiter` usage pattern (direct,
//! unkeyed limiter + `until_ready`), pinned to this workspace's
//! `governor` version rather than Xevion's pin.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use std::num::NonZeroU32;
use tokio_util::sync::CancellationToken;

/// Wraps a `governor` direct rate limiter, or `None` for the
/// unlimited case (`maxDispatchesPerSecond == 0`).
pub struct RateLimit {
    limiter: Option<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimit {
    /// `rate == 0` means unlimited, matching the
    /// `max_dispatches_per_second` convention.
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        if rate_per_second <= 0.0 {
            return RateLimit { limiter: None };
        }

        let burst = NonZeroU32::new(burst.max(1)).unwrap();
        let quota = if rate_per_second >= 1.0 {
            Quota::per_second(NonZeroU32::new(rate_per_second.round() as u32).unwrap_or(burst)).allow_burst(burst)
        } else {
            // Sub-1Hz rates (e.g. a fractional per-second rate far
            // below 1) are expressed as a period between single-token
            // replenishments.
            let period = std::time::Duration::from_secs_f64(1.0 / rate_per_second);
            Quota::with_period(period).unwrap().allow_burst(burst)
        };

        RateLimit {
            limiter: Some(GovernorRateLimiter::direct(quota)),
        }
    }

    pub fn unlimited() -> Self {
        RateLimit { limiter: None }
    }

    /// Waits until a token is available, or returns early if
    /// `cancel` fires — used to abort in-flight waits on dispatcher
    /// stop.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        let Some(limiter) = &self.limiter else {
            return true;
        };
        tokio::select! {
            _ = limiter.until_ready() => true,
            _ = cancel.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_never_waits() {
        let rl = RateLimit::unlimited();
        let cancel = CancellationToken::new();
        for _ in 0..1000 {
            assert!(rl.acquire(&cancel).await);
        }
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_wait() {
        let rl = RateLimit::new(0.000_001, 1);
        let cancel = CancellationToken::new();
        assert!(rl.acquire(&cancel).await, "first token is available immediately (burst=1)");
        cancel.cancel();
        assert!(!rl.acquire(&cancel).await);
    }
}
