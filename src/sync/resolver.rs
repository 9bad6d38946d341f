//! Whether an indicator value is already registered in the store

use crate::error::{CallError, RetryError};
use crate::models::PageCursor;
use crate::pacing::{RateLimiter, RetryPolicy};
use crate::storage::IndicatorStore;

pub struct ExistenceResolver<'a, S: IndicatorStore + ?Sized> {
    store: &'a S,
    limiter: &'a RateLimiter,
    retry: &'a RetryPolicy,
}

impl<'a, S: IndicatorStore + ?Sized> ExistenceResolver<'a, S> {
    pub fn new(store: &'a S, limiter: &'a RateLimiter, retry: &'a RetryPolicy) -> Self {
        Self {
            store,
            limiter,
            retry,
        }
    }

    /// Walk the lookup pages for `value`.
    ///
    /// Stops at the first page that has any entry, otherwise follows the
    /// cursor until the store stops issuing one.
    pub async fn exists(&self, value: &str) -> Result<bool, RetryError<CallError>> {
        let store = self.store;
        let limiter = self.limiter;
        let mut cursor: Option<PageCursor> = None;
        let mut pages = 0u32;

        loop {
            let current = cursor.as_ref();
            let page = self
                .retry
                .run("ioc lookup", CallError::is_retryable, move || async move {
                    limiter.wait().await;
                    store.lookup(value, current).await
                })
                .await?
                .into_inner();
            pages += 1;

            if !page.resources.is_empty() {
                tracing::debug!(value, pages, "Indicator found in store");
                return Ok(true);
            }

            match page.next_cursor() {
                Some(next) => cursor = Some(next.clone()),
                None => {
                    tracing::debug!(value, pages, "Indicator not found in store");
                    return Ok(false);
                }
            }
        }
    }
}
