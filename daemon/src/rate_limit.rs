use governor::{clock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use std::num::NonZeroU32;

use crate::config::RateLimitConfig;

/// Token bucket guarding the control socket against command floods.
pub struct ControlRateLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, clock::DefaultClock>,
    enabled: bool,
}

impl ControlRateLimiter {
    /// Zero rates are clamped to one; `Config::validate` rejects them when
    /// limiting is enabled.
    pub fn new(commands_per_second: u32, burst_capacity: u32, enabled: bool) -> Self {
        let quota = Quota::per_second(Self::at_least_one(commands_per_second))
            .allow_burst(Self::at_least_one(burst_capacity));

        Self {
            limiter: RateLimiter::direct(quota),
            enabled,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.commands_per_second,
            config.burst_capacity,
            config.enabled,
        )
    }

    /// Non-blocking: true if the command may proceed.
    pub fn check(&self) -> bool {
        if !self.enabled {
            return true;
        }

        self.limiter.check().is_ok()
    }

    fn at_least_one(value: u32) -> NonZeroU32 {
        NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
    }
}
