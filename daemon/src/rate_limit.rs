use governor::{clock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;

/// Request rate limiter for the transcription endpoints.
/// Uses a token bucket algorithm via governor crate.
pub struct RequestRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, clock::DefaultClock>,
    enabled: bool,
}

impl RequestRateLimiter {
    /// # Panics
    /// Panics if `requests_per_second` or `burst_capacity` is 0.
    pub fn new(requests_per_second: u32, burst_capacity: u32, enabled: bool) -> Self {
        let quota = Quota::per_second(Self::non_zero(requests_per_second))
            .allow_burst(Self::non_zero(burst_capacity));

        Self {
            limiter: RateLimiter::direct(quota),
            enabled,
        }
    }

    pub fn from_config(config: &crate::config::RateLimitConfig) -> Self {
        Self::new(
            config.requests_per_second,
            config.burst_capacity,
            config.enabled,
        )
    }

    /// Immediate check without waiting for a token; a limited request
    /// should be rejected, not queued.
    pub fn check(&self) -> bool {
        if !self.enabled {
            return true;
        }

        self.limiter.check().is_ok()
    }

    fn non_zero(value: u32) -> NonZeroU32 {
        NonZeroU32::new(value).expect("requests_per_second and burst_capacity must be non-zero")
    }
}
