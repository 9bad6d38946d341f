//! Bounded retry for outbound calls

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::RetryError;

/// How the delay between attempts evolves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Backoff {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// Delay doubles after each retry
    Doubling,
}

/// A successful result and how many attempts it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

impl<T> Attempted<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Retry policy applied per call site
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff,
        }
    }

    /// Run `operation` until it succeeds, fails with an error `is_retryable`
    /// rejects, or `max_attempts` is reached.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        is_retryable: impl Fn(&E) -> bool,
        mut call: F,
    ) -> Result<Attempted<T>, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut delay = self.delay;
        let mut attempt = 1;

        loop {
            let error = match call().await {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(e) => e,
            };

            if !is_retryable(&error) {
                tracing::warn!(
                    operation,
                    attempt,
                    error = %error,
                    "Operation failed with a non-retryable error"
                );
                return Err(RetryError::Aborted {
                    attempts: attempt,
                    error,
                });
            }

            if attempt >= self.max_attempts {
                tracing::error!(
                    operation,
                    attempts = attempt,
                    error = %error,
                    "Operation failed after maximum retry attempts"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            tracing::warn!(
                operation,
                attempt,
                max_attempts = self.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "Operation failed, retrying"
            );
            sleep(delay).await;

            if self.backoff == Backoff::Doubling {
                delay = delay.saturating_mul(2);
            }
            attempt += 1;
        }
    }
}
