//! Cursor-driven walk over a feed collection

use reqwest::StatusCode;

use crate::collectors::{FeedPage, FeedSource};
use crate::error::SyncError;
use crate::models::PageCursor;
use crate::pacing::RateLimiter;

/// Where a feed session is in its poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Next call sends a poll request
    Polling,
    /// A page has been handed out; the cursor decides what comes next
    ProcessingPage,
    /// The server reported no further pages
    Done,
    /// An unrecoverable error ended the session
    Failed,
}

/// State of one full poll of a collection
pub struct FeedPaginator<'a, S: FeedSource + ?Sized> {
    source: &'a S,
    limiter: &'a RateLimiter,
    max_attempts: u32,
    cursor: Option<PageCursor>,
    state: PollState,
    requests: u32,
    pages: u32,
}

impl<'a, S: FeedSource + ?Sized> FeedPaginator<'a, S> {
    /// `max_attempts` caps consecutive failed polls of the same page
    pub fn new(source: &'a S, limiter: &'a RateLimiter, max_attempts: u32) -> Self {
        Self {
            source,
            limiter,
            max_attempts: max_attempts.max(1),
            cursor: None,
            state: PollState::Polling,
            requests: 0,
            pages: 0,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Poll requests sent so far, failed ones included
    pub fn requests(&self) -> u32 {
        self.requests
    }

    pub fn pages(&self) -> u32 {
        self.pages
    }

    /// Fetch the next page.
    ///
    /// Returns `Ok(None)` once the feed is exhausted; no request is sent after
    /// that point. Server errors and transport failures re-send the same request
    /// after a rate-limit pause until `max_attempts` is reached. 401/403 and 404
    /// end the session immediately.
    pub async fn next_page(&mut self) -> Result<Option<FeedPage>, SyncError> {
        if self.state == PollState::ProcessingPage {
            self.state = if self.cursor.is_some() {
                PollState::Polling
            } else {
                PollState::Done
            };
        }

        if self.state != PollState::Polling {
            return Ok(None);
        }

        let mut failures = 0;
        loop {
            self.limiter.wait().await;
            self.requests += 1;
            metrics::counter!("taxiiforge_feed_requests_total").increment(1);

            let error = match self.source.poll(self.cursor.as_ref()).await {
                Ok(page) => {
                    self.pages += 1;
                    self.cursor = page.next_cursor().cloned();
                    self.state = PollState::ProcessingPage;
                    tracing::info!(
                        collection = self.source.collection(),
                        page = self.pages,
                        objects = page.objects.len(),
                        more = self.cursor.is_some(),
                        "Retrieved feed page"
                    );
                    return Ok(Some(page));
                }
                Err(e) => e,
            };

            if error.is_unauthorized() {
                self.state = PollState::Failed;
                tracing::error!(
                    collection = self.source.collection(),
                    error = %error,
                    "TAXII server rejected credentials"
                );
                return Err(SyncError::Unauthorized {
                    service: "TAXII feed",
                });
            }

            if error.status() == Some(StatusCode::NOT_FOUND) {
                self.state = PollState::Failed;
                tracing::error!(
                    collection = self.source.collection(),
                    error = %error,
                    "TAXII collection does not exist"
                );
                return Err(SyncError::CollectionNotFound {
                    collection: self.source.collection().to_string(),
                });
            }

            failures += 1;
            metrics::counter!("taxiiforge_feed_errors_total").increment(1);

            if failures >= self.max_attempts {
                self.state = PollState::Failed;
                tracing::error!(
                    collection = self.source.collection(),
                    attempts = failures,
                    status = error.status().map(|s| s.as_u16()),
                    error = %error,
                    "Giving up on TAXII feed"
                );
                return Err(SyncError::FeedUnavailable {
                    attempts: failures,
                    last: error,
                });
            }

            tracing::warn!(
                collection = self.source.collection(),
                attempt = failures,
                max_attempts = self.max_attempts,
                status = error.status().map(|s| s.as_u16()),
                error = %error,
                "Failed to poll TAXII server, retrying same page"
            );
        }
    }
}
