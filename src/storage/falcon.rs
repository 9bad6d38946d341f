//! CrowdStrike Falcon IOC API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

use crate::auth::BearerToken;
use crate::error::CallError;
use crate::models::{PageCursor, UpsertPayload};
use crate::storage::{IndicatorStore, LookupPage};

const QUERY_PATH: &str = "indicators/queries/iocs/v1";
const ENTITIES_PATH: &str = "indicators/entities/iocs/v1";

/// Falcon indicator store, authenticated with a bearer token
pub struct FalconStore {
    client: Client,
    query_url: Url,
    entities_url: Url,
    token: BearerToken,
}

impl FalconStore {
    pub fn new(base_url: &Url, token: BearerToken, timeout: Duration) -> Result<Self, CallError> {
        let client = Client::builder().timeout(timeout).build()?;
        let join = |path: &str| {
            base_url
                .join(path)
                .map_err(|e| CallError::Decode(format!("invalid Falcon base URL: {}", e)))
        };

        Ok(Self {
            client,
            query_url: join(QUERY_PATH)?,
            entities_url: join(ENTITIES_PATH)?,
            token,
        })
    }

    async fn send_payload(
        &self,
        request: reqwest::RequestBuilder,
        payload: &UpsertPayload,
    ) -> Result<StatusCode, CallError> {
        let response = request
            .bearer_auth(self.token.secret())
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Err(CallError::from_response(response).await);
        }

        Ok(status)
    }
}

#[async_trait]
impl IndicatorStore for FalconStore {
    async fn lookup(&self, value: &str, cursor: Option<&PageCursor>) -> Result<LookupPage, CallError> {
        let mut request = self
            .client
            .get(self.query_url.clone())
            .bearer_auth(self.token.secret())
            .query(&[("value", value)]);

        if let Some(cursor) = cursor {
            request = request.query(&[("next_token", cursor.as_str())]);
        }

        let response = request.send().await?;
        if response.status() != StatusCode::OK {
            return Err(CallError::from_response(response).await);
        }

        response
            .json::<LookupPage>()
            .await
            .map_err(|e| CallError::Decode(format!("IOC lookup response: {}", e)))
    }

    async fn create(&self, payload: &UpsertPayload) -> Result<StatusCode, CallError> {
        self.send_payload(self.client.post(self.entities_url.clone()), payload)
            .await
    }

    async fn update(&self, payload: &UpsertPayload) -> Result<StatusCode, CallError> {
        self.send_payload(self.client.patch(self.entities_url.clone()), payload)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::models::{IndicatorAction, IocType};

    fn store_for(server: &MockServer) -> FalconStore {
        FalconStore::new(
            &Url::parse(&format!("{}/", server.uri())).unwrap(),
            BearerToken::new("tkn"),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn payload() -> UpsertPayload {
        UpsertPayload {
            ioc_type: IocType::Domain,
            value: "bad.example.com".into(),
            action: IndicatorAction::Detect,
            valid_until: "2026-01-17T00:00:00Z".into(),
            source: "TAXII Import".into(),
        }
    }

    #[tokio::test]
    async fn lookup_sends_value_and_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indicators/queries/iocs/v1"))
            .and(query_param("value", "bad.example.com"))
            .and(query_param("next_token", "n1"))
            .and(header("authorization", "Bearer tkn"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": ["id-1"],
                "meta": { "pagination": {} },
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/indicators/queries/iocs/v1"))
            .and(query_param("value", "bad.example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [],
                "meta": { "pagination": { "next_token": "n1" } },
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server);
        let first = store.lookup("bad.example.com", None).await.unwrap();
        assert!(first.resources.is_empty());
        let cursor = first.next_cursor().cloned();

        let second = store.lookup("bad.example.com", cursor.as_ref()).await.unwrap();
        assert_eq!(second.resources.len(), 1);
        assert!(second.next_cursor().is_none());
    }

    #[tokio::test]
    async fn create_posts_and_update_patches_the_payload() {
        let server = MockServer::start().await;
        let expected = json!({
            "type": "domain",
            "value": "bad.example.com",
            "action": "detect",
            "valid_until": "2026-01-17T00:00:00Z",
            "source": "TAXII Import",
        });
        Mock::given(method("POST"))
            .and(path("/indicators/entities/iocs/v1"))
            .and(body_json(&expected))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/indicators/entities/iocs/v1"))
            .and(body_json(&expected))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server);
        assert_eq!(store.create(&payload()).await.unwrap(), StatusCode::CREATED);
        assert_eq!(store.update(&payload()).await.unwrap(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rejected_upsert_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad type"))
            .mount(&server)
            .await;

        let err = store_for(&server).create(&payload()).await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
        assert!(!err.is_retryable());
    }
}
