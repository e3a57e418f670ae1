use http::StatusCode;
use sequoia_auth::AuthError;
use sequoia_http::HttpError;
use thiserror::Error;

use crate::page::Page;

/// Coarse classification of [`SdkError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A credential could not be obtained; never retried.
    Authentication,
    /// The service refused the request (4xx); retrying will not help.
    Client,
    /// Retries were exhausted or the service failed.
    Service,
    /// The call itself was malformed: bad configuration, URL or input.
    Usage,
}

/// What the last attempt of a failed call ended with.
#[derive(Debug, Error)]
pub enum ServiceFailure {
    #[error("HTTP {status}")]
    Status { status: StatusCode, page: Box<Page> },
    #[error(transparent)]
    Transport(HttpError),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SdkError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// Non-retryable 4xx; `page` carries the service's error document.
    #[error("request rejected: HTTP {status}{}", service_message(.page))]
    Client { status: StatusCode, page: Box<Page> },

    #[error("service failed after {attempts} attempt(s): {cause}")]
    Service { attempts: u32, cause: ServiceFailure },

    #[error("document cannot be updated: version does not match")]
    NotMatchingVersion { page: Box<Page> },

    #[error("reference mismatch: {0}")]
    ReferenceMismatch(String),

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Caller-supplied document is not usable JSON.
    #[error("invalid payload: {0}")]
    Payload(String),
}

impl SdkError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication(_) => ErrorKind::Authentication,
            Self::Client { .. } | Self::NotMatchingVersion { .. } => ErrorKind::Client,
            Self::Service { .. } => ErrorKind::Service,
            Self::ReferenceMismatch(_)
            | Self::UnknownService(_)
            | Self::Config(_)
            | Self::InvalidUrl { .. }
            | Self::Payload(_) => ErrorKind::Usage,
        }
    }

    /// HTTP status of the final response, when there was one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Client { status, .. }
            | Self::Service {
                cause: ServiceFailure::Status { status, .. },
                ..
            } => Some(*status),
            Self::NotMatchingVersion { page } => Some(page.status()),
            _ => None,
        }
    }

    /// The final response page, when there was one.
    #[must_use]
    pub fn page(&self) -> Option<&Page> {
        match self {
            Self::Client { page, .. }
            | Self::NotMatchingVersion { page }
            | Self::Service {
                cause: ServiceFailure::Status { page, .. },
                ..
            } => Some(page.as_ref()),
            _ => None,
        }
    }

    pub(crate) fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// `": <message>"` from a service error document, if it has one.
fn service_message(page: &Page) -> String {
    page.json()
        .get("message")
        .and_then(serde_json::Value::as_str)
        .map(|message| format!(": {message}"))
        .unwrap_or_default()
}
