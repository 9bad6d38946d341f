//! TAXII collection poll client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use url::Url;

use crate::collectors::{FeedPage, FeedSource};
use crate::error::CallError;
use crate::models::PageCursor;

/// Credentials for the TAXII server
#[derive(Clone)]
pub struct TaxiiCredentials {
    pub username: String,
    pub password: String,
}

/// Polls one TAXII collection over HTTP basic auth
pub struct TaxiiClient {
    client: Client,
    poll_url: Url,
    collection: String,
    credentials: TaxiiCredentials,
}

impl TaxiiClient {
    pub fn new(
        server_url: &Url,
        collection: String,
        credentials: TaxiiCredentials,
        timeout: Duration,
    ) -> Result<Self, CallError> {
        let client = Client::builder().timeout(timeout).build()?;

        let mut poll_url = server_url.clone();
        poll_url
            .path_segments_mut()
            .map_err(|_| CallError::Decode(format!("TAXII server URL cannot be a base: {}", server_url)))?
            .pop_if_empty()
            .extend(["collections", collection.as_str(), "poll"]);

        Ok(Self {
            client,
            poll_url,
            collection,
            credentials,
        })
    }

    pub fn poll_url(&self) -> &Url {
        &self.poll_url
    }

    fn poll_request_body(cursor: Option<&PageCursor>) -> String {
        match cursor {
            Some(cursor) => format!("<taxii_poll_request_xml next={}/>", cursor),
            None => "<taxii_poll_request_xml/>".to_string(),
        }
    }
}

#[async_trait]
impl FeedSource for TaxiiClient {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn poll(&self, cursor: Option<&PageCursor>) -> Result<FeedPage, CallError> {
        tracing::debug!(
            url = %self.poll_url,
            cursor = cursor.map(PageCursor::as_str),
            "Sending TAXII poll request"
        );

        let response = self
            .client
            .post(self.poll_url.clone())
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .header(CONTENT_TYPE, "application/xml")
            .body(Self::poll_request_body(cursor))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CallError::from_response(response).await);
        }

        response
            .json::<FeedPage>()
            .await
            .map_err(|e| CallError::Decode(format!("TAXII poll response: {}", e)))
    }
}
