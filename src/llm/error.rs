//! LLM error types

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// LLM error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Connection, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::InvalidRequest, message)
    }

    pub fn content_rejected(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ContentRejected, message)
    }

    pub fn session_invalid(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::SessionInvalid, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Unknown, message)
    }

    /// Classify a transport-level failure from the HTTP client
    pub fn from_transport(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::network(format!("Request timeout: {e}"))
        } else if e.is_connect() {
            Self::connection(format!("Connection failed: {e}"))
        } else if e.is_request() || e.is_body() {
            Self::connection(format!("Connection interrupted: {e}"))
        } else {
            Self::unknown(format!("Request failed: {e}"))
        }
    }

    /// Classify an unsuccessful HTTP status
    pub fn from_status(status: u16, message: &str) -> Self {
        match status {
            400 => Self::content_rejected(format!("Request rejected: {message}")),
            401 | 403 => Self::auth(format!("Authentication failed: {message}")),
            404 => Self::invalid_request(format!("Model not found: {message}")),
            429 => Self::rate_limit(format!("Rate limit exceeded: {message}")),
            500..=599 => Self::server_error(format!("Server error: {message}")),
            _ => Self::unknown(format!("HTTP {status}: {message}")),
        }
    }
}

/// Error classification used to pick a recovery path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorKind {
    /// Timeouts and other network trouble
    Network,
    /// The connection itself failed or was torn down mid-request
    Connection,
    /// Rate limited (429)
    RateLimit,
    /// Server error (5xx)
    ServerError,
    /// Authentication failed (401, 403)
    Auth,
    /// Unknown model or a request the service could never make valid (404)
    InvalidRequest,
    /// This message was refused (safety block, plain 400). Rewording may help.
    ContentRejected,
    /// The session handle is closed, expired, or bound to a recycled client
    SessionInvalid,
    /// Unknown error
    Unknown,
}

impl LlmErrorKind {
    /// Credential or model problems. Nothing the user types can fix these.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Auth | Self::InvalidRequest)
    }

    /// Surfaced to the user, who may resubmit
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Network
                | Self::Connection
                | Self::RateLimit
                | Self::ServerError
                | Self::ContentRejected
                | Self::Unknown
        )
    }

    pub fn is_session_invalid(self) -> bool {
        self == Self::SessionInvalid
    }
}
