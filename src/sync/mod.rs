//! Feed-to-store synchronization

pub mod expiration;
pub mod reconciler;
pub mod resolver;

use crate::collectors::{FeedPaginator, FeedSource};
use crate::error::SyncError;
use crate::extractor::IndicatorExtractor;
use crate::models::{IndicatorAction, UpsertAction, UpsertOutcome};
use crate::pacing::{RateLimiter, RetryPolicy};
use crate::storage::IndicatorStore;

pub use expiration::ExpirationPolicy;
use reconciler::Reconciler;

/// Knobs for one sync run
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub extractor: IndicatorExtractor,
    pub expiration: ExpirationPolicy,
    pub action: IndicatorAction,
    pub retry: RetryPolicy,
    /// Consecutive failed polls of one feed page before giving up
    pub feed_max_attempts: u32,
}

/// Summary of a completed run
#[derive(Debug, Default)]
pub struct SyncReport {
    pub pages: u32,
    pub feed_requests: u32,
    pub extracted: usize,
    pub duplicates: usize,
    pub outcomes: Vec<UpsertOutcome>,
}

impl SyncReport {
    pub fn count(&self, action: UpsertAction) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }

    pub fn created(&self) -> usize {
        self.count(UpsertAction::Created)
    }

    pub fn updated(&self) -> usize {
        self.count(UpsertAction::Updated)
    }

    pub fn failed(&self) -> usize {
        self.count(UpsertAction::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

/// Poll the feed to exhaustion and reconcile every extracted indicator,
/// page by page, in feed order.
pub async fn run_sync<F, S>(
    feed: &F,
    store: &S,
    limiter: &RateLimiter,
    settings: &SyncSettings,
) -> Result<SyncReport, SyncError>
where
    F: FeedSource + ?Sized,
    S: IndicatorStore + ?Sized,
{
    tracing::info!(collection = feed.collection(), "Polling TAXII collection");

    let mut paginator = FeedPaginator::new(feed, limiter, settings.feed_max_attempts);
    let mut reconciler = Reconciler::new(
        store,
        limiter,
        &settings.retry,
        settings.expiration,
        settings.action,
    );
    let mut report = SyncReport::default();

    while let Some(page) = paginator.next_page().await? {
        let mut on_page = 0;
        for indicator in settings.extractor.extract(&page) {
            on_page += 1;
            match reconciler.reconcile(indicator).await? {
                Some(outcome) => report.outcomes.push(outcome),
                None => report.duplicates += 1,
            }
        }
        report.extracted += on_page;
        tracing::info!(page = paginator.pages(), iocs = on_page, "Processed IOCs from TAXII page");
    }

    for outcome in report.outcomes.iter().filter(|o| o.action == UpsertAction::Failed) {
        tracing::warn!(
            ioc_type = %outcome.indicator.ioc_type,
            value = %outcome.indicator.value,
            status = outcome.http_status,
            attempts = outcome.attempts,
            "IOC was not pushed"
        );
    }

    report.pages = paginator.pages();
    report.feed_requests = paginator.requests();
    tracing::debug!(state = ?paginator.state(), requests = report.feed_requests, "Feed session finished");

    tracing::info!(
        pages = report.pages,
        extracted = report.extracted,
        created = report.created(),
        updated = report.updated(),
        failed = report.failed(),
        duplicates = report.duplicates,
        "IOC ingestion complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_string, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::auth::BearerToken;
    use crate::collectors::taxii::{TaxiiClient, TaxiiCredentials};
    use crate::models::IocType;
    use crate::pacing::Backoff;
    use crate::storage::FalconStore;

    const POLL: &str = "/collections/feed/poll";
    const LOOKUP: &str = "/indicators/queries/iocs/v1";
    const ENTITIES: &str = "/indicators/entities/iocs/v1";

    fn settings() -> SyncSettings {
        SyncSettings {
            extractor: IndicatorExtractor::new(IocType::ALL, "TAXII Import"),
            expiration: ExpirationPolicy::default(),
            action: IndicatorAction::Detect,
            retry: RetryPolicy::new(3, Duration::ZERO, Backoff::Fixed),
            feed_max_attempts: 3,
        }
    }

    fn clients(server: &MockServer) -> (TaxiiClient, FalconStore) {
        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        let feed = TaxiiClient::new(
            &base,
            "feed".into(),
            TaxiiCredentials {
                username: "u".into(),
                password: "p".into(),
            },
            Duration::from_secs(5),
        )
        .unwrap();
        let store = FalconStore::new(&base, BearerToken::new("tkn"), Duration::from_secs(5)).unwrap();
        (feed, store)
    }

    fn domain_page(domains: &[&str], next: Option<&str>) -> serde_json::Value {
        let objects: Vec<_> = domains
            .iter()
            .map(|d| json!({ "type": "indicator", "pattern": format!("[domain-name:value = '{}']", d) }))
            .collect();
        json!({ "objects": objects, "next_token": next })
    }

    async fn mount_poll(server: &MockServer, request: &str, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path(POLL))
            .and(body_string(request))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(server)
            .await;
    }

    async fn mount_lookup(server: &MockServer, value: &str, resources: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(LOOKUP))
            .and(query_param("value", value))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resources": resources })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn two_page_feed_is_reconciled_in_order() {
        let server = MockServer::start().await;
        mount_poll(
            &server,
            "<taxii_poll_request_xml/>",
            domain_page(&["bad.example.com"], Some("tok1")),
        )
        .await;
        mount_poll(
            &server,
            "<taxii_poll_request_xml next=tok1/>",
            domain_page(&["evil.example.org"], None),
        )
        .await;
        mount_lookup(&server, "bad.example.com", json!([])).await;
        mount_lookup(&server, "evil.example.org", json!([])).await;
        Mock::given(method("POST"))
            .and(path(ENTITIES))
            .respond_with(ResponseTemplate::new(201))
            .expect(2)
            .mount(&server)
            .await;

        let (feed, store) = clients(&server);
        let limiter = RateLimiter::disabled();
        let report = run_sync(&feed, &store, &limiter, &settings()).await.unwrap();

        assert_eq!(report.pages, 2);
        assert_eq!(report.feed_requests, 2);
        assert_eq!(report.extracted, 2);
        let values: Vec<_> = report
            .outcomes
            .iter()
            .map(|o| o.indicator.value.as_str())
            .collect();
        assert_eq!(values, vec!["bad.example.com", "evil.example.org"]);
        assert_eq!(report.created(), 2);
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn unauthorized_feed_aborts_before_any_indicator() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(POLL))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(LOOKUP))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (feed, store) = clients(&server);
        let limiter = RateLimiter::disabled();
        let err = run_sync(&feed, &store, &limiter, &settings()).await.unwrap_err();

        assert!(matches!(err, SyncError::Unauthorized { service: "TAXII feed" }));
    }

    #[tokio::test]
    async fn failed_upsert_does_not_stop_the_batch() {
        let server = MockServer::start().await;
        mount_poll(
            &server,
            "<taxii_poll_request_xml/>",
            domain_page(&["flaky.example.com", "fine.example.com"], None),
        )
        .await;
        mount_lookup(&server, "flaky.example.com", json!([])).await;
        mount_lookup(&server, "fine.example.com", json!(["id-2"])).await;
        Mock::given(method("POST"))
            .and(path(ENTITIES))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(ENTITIES))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (feed, store) = clients(&server);
        let limiter = RateLimiter::disabled();
        let report = run_sync(&feed, &store, &limiter, &settings()).await.unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].action, UpsertAction::Failed);
        assert_eq!(report.outcomes[0].attempts, 3);
        assert_eq!(report.outcomes[1].action, UpsertAction::Updated);
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn value_repeated_across_pages_is_pushed_once() {
        let server = MockServer::start().await;
        mount_poll(
            &server,
            "<taxii_poll_request_xml/>",
            domain_page(&["again.example.com"], Some("tok1")),
        )
        .await;
        mount_poll(
            &server,
            "<taxii_poll_request_xml next=tok1/>",
            domain_page(&["again.example.com"], None),
        )
        .await;
        mount_lookup(&server, "again.example.com", json!([])).await;
        Mock::given(method("POST"))
            .and(path(ENTITIES))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(ENTITIES))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (feed, store) = clients(&server);
        let limiter = RateLimiter::disabled();
        let report = run_sync(&feed, &store, &limiter, &settings()).await.unwrap();

        assert_eq!(report.extracted, 2);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.created(), 1);
    }

    #[tokio::test]
    async fn empty_feed_touches_nothing_downstream() {
        let server = MockServer::start().await;
        mount_poll(
            &server,
            "<taxii_poll_request_xml/>",
            json!({ "objects": [{ "type": "identity", "name": "ACME CERT" }] }),
        )
        .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (feed, store) = clients(&server);
        let limiter = RateLimiter::disabled();
        let report = run_sync(&feed, &store, &limiter, &settings()).await.unwrap();

        assert_eq!(report.pages, 1);
        assert!(report.outcomes.is_empty());
    }
}
