//! Indicator expiration timestamps

use chrono::{DateTime, Duration, Utc};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Fixed lifetime granted to every pushed indicator
#[derive(Debug, Clone, Copy)]
pub struct ExpirationPolicy {
    ttl: Duration,
}

impl ExpirationPolicy {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn from_days(days: i64) -> Self {
        Self::new(Duration::days(days))
    }

    /// `now + ttl` as an ISO-8601 UTC timestamp
    pub fn valid_until_from(&self, now: DateTime<Utc>) -> String {
        (now + self.ttl).format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn valid_until(&self) -> String {
        self.valid_until_from(Utc::now())
    }
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self::from_days(90)
    }
}
