//! Minimum spacing between outbound requests

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota};

/// Pacing guard shared by every component of a sync run.
///
/// Allows one request per `delay`. The first request goes out immediately,
/// each later one waits until `delay` has elapsed since the previous slot.
pub struct RateLimiter {
    inner: Option<DefaultDirectRateLimiter>,
    delay: Duration,
}

impl RateLimiter {
    pub fn new(delay: Duration) -> Self {
        let inner = Quota::with_period(delay)
            .map(|quota| quota.allow_burst(NonZeroU32::MIN))
            .map(governor::RateLimiter::direct);

        Self { inner, delay }
    }

    /// No pacing at all
    #[cfg(test)]
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait until the next request may be issued
    pub async fn wait(&self) {
        if let Some(limiter) = &self.inner {
            if limiter.check().is_err() {
                tracing::debug!(delay_ms = self.delay.as_millis() as u64, "Rate limiting before next request");
                limiter.until_ready().await;
            }
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("delay", &self.delay).finish()
    }
}
