//! Request pacing and retry for outbound calls

pub mod rate_limit;
pub mod retry;

pub use rate_limit::RateLimiter;
pub use retry::{Backoff, RetryPolicy};
