//! Turns raw feed objects into indicators

pub mod pattern;

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::collectors::FeedPage;
use crate::models::ioc_utils::{is_valid_ioc, normalize_ioc};
use crate::models::{Indicator, IocType};

/// The fields of a STIX indicator object we read
#[derive(Debug, Deserialize)]
struct StixObject {
    #[serde(rename = "type")]
    object_type: String,
    pattern: Option<String>,
    pattern_type: Option<String>,
    #[serde(default)]
    revoked: bool,
}

/// Extracts supported indicators from feed pages
#[derive(Debug, Clone)]
pub struct IndicatorExtractor {
    enabled: HashSet<IocType>,
    source_label: String,
}

impl IndicatorExtractor {
    pub fn new(enabled: impl IntoIterator<Item = IocType>, source_label: impl Into<String>) -> Self {
        Self {
            enabled: enabled.into_iter().collect(),
            source_label: source_label.into(),
        }
    }

    pub fn supports(&self, ioc_type: IocType) -> bool {
        self.enabled.contains(&ioc_type)
    }

    /// Indicators in `page`, in record order. Holds no state between calls.
    pub fn extract<'a>(&'a self, page: &'a FeedPage) -> impl Iterator<Item = Indicator> + 'a {
        page.objects
            .iter()
            .flat_map(move |object| self.extract_object(object))
    }

    fn extract_object(&self, object: &Value) -> Vec<Indicator> {
        let stix = match StixObject::deserialize(object) {
            Ok(stix) => stix,
            Err(e) => {
                tracing::debug!(error = %e, "Dropping unparseable feed object");
                return vec![];
            }
        };

        if stix.object_type != "indicator" || stix.revoked {
            return vec![];
        }

        if let Some(pattern_type) = stix.pattern_type.as_deref() {
            if !pattern_type.eq_ignore_ascii_case("stix") {
                tracing::debug!(pattern_type, "Skipping non-STIX pattern");
                return vec![];
            }
        }

        let Some(pattern) = stix.pattern.as_deref() else {
            tracing::debug!("Skipping indicator without a pattern");
            return vec![];
        };

        let mut indicators: Vec<Indicator> = vec![];
        for comparison in pattern::comparisons(pattern) {
            let Some(ioc_type) = comparison.ioc_type() else {
                continue;
            };
            if !self.supports(ioc_type) {
                continue;
            }

            let value = normalize_ioc(&comparison.value, ioc_type);
            if !is_valid_ioc(&value, ioc_type) {
                tracing::debug!(%ioc_type, value = %comparison.value, "Dropping malformed indicator value");
                continue;
            }

            if indicators
                .iter()
                .any(|i| i.ioc_type == ioc_type && i.value == value)
            {
                continue;
            }

            indicators.push(Indicator {
                ioc_type,
                value,
                source_label: self.source_label.clone(),
            });
        }

        if indicators.is_empty() {
            tracing::debug!(pattern, "Unsupported STIX pattern");
        }

        indicators
    }
}
