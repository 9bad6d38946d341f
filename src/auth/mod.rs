//! OAuth2 client-credentials token for the Falcon API

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::CallError;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Bearer credential, read-only once acquired
#[derive(Clone)]
pub struct BearerToken(Arc<str>);

impl BearerToken {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

/// Fetches bearer tokens from the Falcon OAuth2 endpoint
pub struct FalconAuth {
    client: Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
}

impl FalconAuth {
    pub fn new(
        base_url: &Url,
        client_id: String,
        client_secret: String,
        timeout: Duration,
    ) -> Result<Self, CallError> {
        let client = Client::builder().timeout(timeout).build()?;
        let token_url = base_url
            .join("oauth2/token")
            .map_err(|e| CallError::Decode(format!("invalid Falcon base URL: {}", e)))?;

        Ok(Self {
            client,
            token_url,
            client_id,
            client_secret,
        })
    }

    /// Request a fresh bearer token
    pub async fn fetch_token(&self) -> Result<BearerToken, CallError> {
        tracing::info!("Fetching Falcon OAuth2 token");

        let response = self
            .client
            .post(self.token_url.clone())
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CallError::from_response(response).await);
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CallError::Decode(format!("token response: {}", e)))?;

        match body.access_token {
            Some(token) if !token.is_empty() => {
                tracing::info!("Falcon OAuth2 token acquired");
                Ok(BearerToken::new(token))
            }
            _ => Err(CallError::Decode(
                "token response has no access_token".to_string(),
            )),
        }
    }
}
