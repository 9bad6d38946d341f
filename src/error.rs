//! Error types for feed polling and indicator reconciliation

use reqwest::StatusCode;

/// Failure of a single outbound call
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// Connection, timeout or TLS failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Success status but the body was not what we expected
    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl CallError {
    /// Build a status error from a response, consuming its body for context
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        CallError::Status { status, body }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CallError::Status { status, .. } => Some(*status),
            CallError::Transport(e) => e.status(),
            CallError::Decode(_) => None,
        }
    }

    /// Whether repeating the same call could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Transport(_) => true,
            CallError::Decode(_) => false,
            CallError::Status { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
            }
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        )
    }
}

/// Result of a retried operation that never succeeded
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// An attempt failed with an error the call site does not retry
    #[error("aborted on attempt {attempts}: {error}")]
    Aborted { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Aborted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The error from the final attempt
    pub fn last(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted { error, .. } => error,
        }
    }
}

/// Errors that end a whole sync run
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("credentials rejected by {service}")]
    Unauthorized { service: &'static str },

    #[error("could not obtain a bearer token: {0}")]
    TokenUnavailable(#[source] RetryError<CallError>),

    #[error("TAXII collection '{collection}' not found")]
    CollectionNotFound { collection: String },

    #[error("TAXII feed still failing after {attempts} consecutive attempts: {last}")]
    FeedUnavailable { attempts: u32, last: CallError },
}
