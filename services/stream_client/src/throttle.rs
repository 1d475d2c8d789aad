//! Subscribe throttling
//!
//! One GCRA limiter shared by every connection of a pool. Waiting on it never
//! takes a lock; callers that opt out of throttling skip it entirely.

use governor::{DefaultDirectRateLimiter, Quota};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;

use crate::config::ThrottleConfig;

/// Rate limiter for outbound subscribe requests
pub struct SubscribeThrottle {
    limiter: DefaultDirectRateLimiter,
    per_second: u32,
}

impl SubscribeThrottle {
    /// Create a throttle from configuration
    pub fn new(config: &ThrottleConfig) -> Self {
        let rate = NonZeroU32::new(config.subscribes_per_second).unwrap_or_else(|| {
            tracing::warn!(
                "Invalid subscribe rate {}, falling back to 10/s",
                config.subscribes_per_second
            );
            nonzero!(10u32)
        });
        let burst = NonZeroU32::new(config.burst).unwrap_or(nonzero!(1u32));

        Self {
            limiter: DefaultDirectRateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
            per_second: rate.get(),
        }
    }

    /// Check if a send is allowed right now (non-blocking)
    pub fn check(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Wait until a send is allowed
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }

    /// Configured sustained rate
    pub fn per_second(&self) -> u32 {
        self.per_second
    }
}

impl std::fmt::Debug for SubscribeThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeThrottle")
            .field("per_second", &self.per_second)
            .finish()
    }
}
