//! Threat intelligence feed collection

pub mod paginator;
pub mod taxii;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CallError;
use crate::models::PageCursor;

pub use paginator::FeedPaginator;
pub use taxii::TaxiiClient;

/// One page of raw feed objects
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedPage {
    #[serde(default)]
    pub objects: Vec<Value>,

    #[serde(
        default,
        alias = "next",
        deserialize_with = "PageCursor::deserialize_opt"
    )]
    next_token: Option<PageCursor>,

    /// TAXII 2.1 envelopes say explicitly whether more pages follow
    #[serde(default)]
    more: Option<bool>,
}

impl FeedPage {
    /// Cursor for the following page, if the server announced one
    pub fn next_cursor(&self) -> Option<&PageCursor> {
        if self.more == Some(false) {
            return None;
        }
        self.next_token.as_ref()
    }
}

/// Trait for paginated feed sources
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Collection being polled, for logs and errors
    fn collection(&self) -> &str;

    /// Fetch the page at `cursor`, or the first page when there is none
    async fn poll(&self, cursor: Option<&PageCursor>) -> Result<FeedPage, CallError>;
}
