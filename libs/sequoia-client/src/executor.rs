//! Runs one logical request to completion: attempt, classify, wait, repeat.
//!
//! The retry loop is an explicit state machine driven by a [`Clock`], so tests
//! can run it against scripted transports without real delays:
//!
//! ```text
//! Attempting ──► Waiting ──► Attempting ──► … ──► Done | Failed
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use sequoia_auth::CredentialProvider;
use sequoia_http::HttpError;
use sequoia_utils::{Clock, TokioClock};
use tokio::time::Instant;
use url::Url;

use crate::backoff::{BackoffPolicy, Decision, Outcome};
use crate::completeness::{RetrySpec, is_complete};
use crate::correlation::{CORRELATION_HEADER, CorrelationId};
use crate::error::{SdkError, ServiceFailure};
use crate::page::Page;
use crate::transport::{Transport, TransportRequest};

/// Media type sent as `Content-Type` and `Accept` unless configured otherwise.
pub const DEFAULT_CONTENT_TYPE: &str = "application/vnd.piksel+json";

/// Everything needed to issue (and re-issue) one request.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub method: Method,
    pub url: Url,
    pub body: Option<Bytes>,
    /// Extra headers; they override the defaults set by the executor.
    pub headers: HeaderMap,
    pub auth_required: bool,
    /// Key of the primary resources in the response document.
    pub resource_name: Option<String>,
    pub retry_spec: Option<RetrySpec>,
}

impl RequestTemplate {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            body: None,
            headers: HeaderMap::new(),
            auth_required: true,
            resource_name: None,
            retry_spec: None,
        }
    }

    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    #[must_use]
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_resource_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_retry_spec(mut self, spec: Option<RetrySpec>) -> Self {
        self.retry_spec = spec;
        self
    }

    #[must_use]
    pub fn without_auth(mut self) -> Self {
        self.auth_required = false;
        self
    }
}

enum State {
    Attempting { attempt: u32 },
    Waiting { attempt: u32, wait: Duration },
    Done(Page),
    Failed(SdkError),
}

/// Issues requests with credentials, correlation and retries applied.
///
/// Cheap to clone; clones share the transport and the credential cache.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    credentials: CredentialProvider,
    policy: BackoffPolicy,
    clock: Arc<dyn Clock>,
    content_type: HeaderValue,
}

impl RequestExecutor {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, credentials: CredentialProvider) -> Self {
        Self {
            transport,
            credentials,
            policy: BackoffPolicy::default(),
            clock: Arc::new(TokioClock),
            content_type: HeaderValue::from_static(DEFAULT_CONTENT_TYPE),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// # Errors
    ///
    /// Returns [`SdkError::Config`] if `content_type` is not a valid header value.
    pub fn with_content_type(mut self, content_type: &str) -> Result<Self, SdkError> {
        self.content_type = HeaderValue::from_str(content_type)
            .map_err(|e| SdkError::Config(format!("invalid content_type: {e}")))?;
        Ok(self)
    }

    #[must_use]
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Run `request` until it succeeds, fails terminally or the retry budget
    /// is spent.
    ///
    /// A success response that stays incomplete after the last attempt is
    /// returned as `Ok`; callers inspect the page.
    ///
    /// # Errors
    ///
    /// - [`SdkError::Authentication`] when no credential could be obtained
    /// - [`SdkError::Client`] for a non-retryable 4xx
    /// - [`SdkError::Service`] for a 5xx, or once retries are exhausted
    pub async fn execute(
        &self,
        request: &RequestTemplate,
        correlation: &CorrelationId,
    ) -> Result<Page, SdkError> {
        let started = self.clock.now();
        let mut state = State::Attempting { attempt: 1 };
        loop {
            state = match state {
                State::Attempting { attempt } => {
                    self.attempt(request, correlation, attempt, started).await
                }
                State::Waiting { attempt, wait } => {
                    self.clock.sleep(wait).await;
                    State::Attempting {
                        attempt: attempt + 1,
                    }
                }
                State::Done(page) => return Ok(page),
                State::Failed(error) => return Err(error),
            };
        }
    }

    async fn attempt(
        &self,
        request: &RequestTemplate,
        correlation: &CorrelationId,
        attempt: u32,
        started: Instant,
    ) -> State {
        let headers = match self.headers(request, correlation).await {
            Ok(headers) => headers,
            Err(error) => return State::Failed(error),
        };

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            attempt,
            correlation_id = %correlation,
            "sending request"
        );

        let sent = self
            .transport
            .send(TransportRequest {
                method: request.method.clone(),
                url: request.url.clone(),
                headers,
                body: request.body.clone(),
            })
            .await;

        let (outcome, result) = match sent {
            Ok(response) => {
                let page = Page::from_response(
                    response.status,
                    response.headers,
                    &response.body,
                    request.url.clone(),
                    request.resource_name.as_deref(),
                );
                let outcome = if page.status().is_success()
                    && !is_complete(&page, request.retry_spec.as_ref())
                {
                    Outcome::IncompleteResult
                } else {
                    Outcome::HttpResponse(page.status())
                };
                (outcome, Ok(page))
            }
            Err(error) if error.is_transport_failure() => (Outcome::TransportFailure, Err(error)),
            Err(error) => return State::Failed(fatal_transport_error(error, attempt)),
        };

        let elapsed = self.clock.now().saturating_duration_since(started);
        match self.policy.should_retry(attempt, elapsed, outcome) {
            Decision::RetryAfter(wait) => {
                tracing::debug!(
                    attempt,
                    outcome = ?outcome,
                    wait_ms = wait.as_millis(),
                    correlation_id = %correlation,
                    "retrying request"
                );
                State::Waiting { attempt, wait }
            }
            Decision::Stop => self.finish(outcome, result, attempt),
        }
    }

    async fn headers(
        &self,
        request: &RequestTemplate,
        correlation: &CorrelationId,
    ) -> Result<HeaderMap, SdkError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, self.content_type.clone());
        headers.insert(ACCEPT, self.content_type.clone());
        headers.insert(
            HeaderName::from_static(CORRELATION_HEADER),
            correlation.header_value()?,
        );

        if request.auth_required {
            let credential = self.credentials.current_token().await?;
            if let Some(bearer) = credential.authorization_header() {
                let mut value = HeaderValue::from_str(bearer.as_str())
                    .map_err(|_| SdkError::Config("access token is not a valid header".into()))?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }

        for (name, value) in &request.headers {
            headers.insert(name.clone(), value.clone());
        }
        Ok(headers)
    }

    fn finish(&self, outcome: Outcome, result: Result<Page, HttpError>, attempts: u32) -> State {
        let page = match result {
            Ok(page) => page,
            Err(error) => {
                tracing::warn!(attempts, error = %error, "giving up after transport failures");
                return State::Failed(SdkError::Service {
                    attempts,
                    cause: ServiceFailure::Transport(error),
                });
            }
        };

        let status = page.status();
        if outcome == Outcome::IncompleteResult {
            tracing::warn!(attempts, url = %page.url(), "returning incomplete result");
            return State::Done(page);
        }
        if status.is_success() {
            return State::Done(page);
        }

        if status == http::StatusCode::UNAUTHORIZED {
            // The next operation exchanges a fresh token; this one still fails.
            tracing::debug!(kind = self.credentials.kind(), "access token rejected by service");
            self.credentials.invalidate();
        }

        let retriable = self.policy.is_retriable_status(status);
        if status.is_client_error() && !retriable {
            return State::Failed(SdkError::Client {
                status,
                page: Box::new(page),
            });
        }
        if retriable || status.is_server_error() {
            if retriable {
                tracing::warn!(attempts, status = %status, "retry budget exhausted");
            }
            return State::Failed(SdkError::Service {
                attempts,
                cause: ServiceFailure::Status {
                    status,
                    page: Box::new(page),
                },
            });
        }
        State::Done(page)
    }
}

/// Errors where retrying cannot help: bad URLs, encoding problems, a closed client.
fn fatal_transport_error(error: HttpError, attempts: u32) -> SdkError {
    match error {
        HttpError::InvalidUri { url, reason, .. } => SdkError::invalid_url(url, reason),
        HttpError::InvalidScheme { scheme, reason } => SdkError::invalid_url(scheme, reason),
        other => {
            tracing::warn!(attempts, error = %other, "request failed");
            SdkError::Service {
                attempts,
                cause: ServiceFailure::Transport(other),
            }
        }
    }
}
