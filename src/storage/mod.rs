//! Destination indicator store

pub mod falcon;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CallError;
use crate::models::{PageCursor, UpsertPayload};

pub use falcon::FalconStore;

/// One page of an indicator lookup
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookupPage {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub resources: Vec<Value>,
    #[serde(default)]
    meta: LookupMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LookupMeta {
    #[serde(default)]
    pagination: LookupPagination,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LookupPagination {
    #[serde(default, deserialize_with = "PageCursor::deserialize_opt")]
    next_token: Option<PageCursor>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl LookupPage {
    pub fn next_cursor(&self) -> Option<&PageCursor> {
        self.meta.pagination.next_token.as_ref()
    }
}

/// Trait for indicator stores that support paginated lookup and upsert
#[async_trait]
pub trait IndicatorStore: Send + Sync {
    /// Entries registered under `value`, starting at `cursor`
    async fn lookup(&self, value: &str, cursor: Option<&PageCursor>) -> Result<LookupPage, CallError>;

    /// Register a new indicator
    async fn create(&self, payload: &UpsertPayload) -> Result<StatusCode, CallError>;

    /// Overwrite an existing indicator
    async fn update(&self, payload: &UpsertPayload) -> Result<StatusCode, CallError>;
}
