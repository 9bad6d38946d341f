//! Core data models for indicator sync

use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

pub mod ioc_utils;

/// Types of Indicators of Compromise the indicator store accepts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IocType {
    Domain,
    Ipv4,
    Ipv6,
    Md5,
    Sha256,
}

impl IocType {
    pub const ALL: [IocType; 5] = [
        IocType::Domain,
        IocType::Ipv4,
        IocType::Ipv6,
        IocType::Md5,
        IocType::Sha256,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IocType::Domain => "domain",
            IocType::Ipv4 => "ipv4",
            IocType::Ipv6 => "ipv6",
            IocType::Md5 => "md5",
            IocType::Sha256 => "sha256",
        }
    }
}

impl std::fmt::Display for IocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An extracted, normalized indicator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indicator {
    pub ioc_type: IocType,
    pub value: String,
    pub source_label: String,
}

/// What the detection platform does when the indicator is seen
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorAction {
    #[default]
    Detect,
    Prevent,
}

/// Opaque pagination token issued by a remote server.
///
/// There is no public constructor: cursors only arrive through deserialization
/// and are sent back as-is. Empty strings on the wire mean "no more pages".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Serde helper for optional cursor fields
    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<PageCursor>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.filter(|s| !s.trim().is_empty()).map(PageCursor))
    }
}

impl std::fmt::Display for PageCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of a create or update call against the indicator store
#[derive(Debug, Clone, Serialize, Validate)]
pub struct UpsertPayload {
    #[serde(rename = "type")]
    pub ioc_type: IocType,
    #[validate(length(min = 1, max = 2048))]
    pub value: String,
    pub action: IndicatorAction,
    pub valid_until: String,
    #[validate(length(min = 1, max = 200))]
    pub source: String,
}

impl UpsertPayload {
    pub fn new(indicator: &Indicator, action: IndicatorAction, valid_until: String) -> Self {
        Self {
            ioc_type: indicator.ioc_type,
            value: indicator.value.clone(),
            action,
            valid_until,
            source: indicator.source_label.clone(),
        }
    }
}

/// What happened to one indicator during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
    Failed,
}

impl UpsertAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertAction::Created => "created",
            UpsertAction::Updated => "updated",
            UpsertAction::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub indicator: Indicator,
    pub action: UpsertAction,
    pub http_status: Option<u16>,
    pub attempts: u32,
}
