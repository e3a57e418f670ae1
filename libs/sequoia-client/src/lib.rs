#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![forbid(unsafe_code)]

//! Authenticated request execution for Sequoia resource services.
//!
//! Every call goes through a [`RequestExecutor`], which
//!
//! - attaches the bearer token from the configured [`CredentialProvider`],
//!   the media type headers and an `x-correlation-id`,
//! - retries transport failures, retriable statuses and (optionally) empty
//!   results according to a [`BackoffPolicy`],
//! - turns the final response into a [`Page`] or an [`SdkError`].
//!
//! Browsing returns a [`PageCursor`]: the first page is fetched eagerly and
//! the rest only on demand. [`PageCursor::linked`] walks one inclusion
//! across the same pages without disturbing the primary cursor.
//!
//! [`CredentialProvider`]: sequoia_auth::CredentialProvider

pub mod backoff;
mod client;
mod completeness;
mod config;
mod correlation;
mod cursor;
mod endpoint;
mod error;
mod executor;
mod linked;
mod page;
mod transport;

pub use backoff::{BackoffConfig, BackoffPolicy, WaitGen, WaitGenerator};
pub use client::{Client, ServiceHandle};
pub use completeness::{RetrySpec, is_complete};
pub use config::{ClientConfig, ENV_PREFIX, IDENTITY_SERVICE};
pub use correlation::{CORRELATION_HEADER, CorrelationConfig, CorrelationContext, CorrelationId};
pub use cursor::PageCursor;
pub use endpoint::{BrowseOptions, BusinessEndpoint, ResourceEndpoint};
pub use error::{ErrorKind, SdkError, ServiceFailure};
pub use executor::{DEFAULT_CONTENT_TYPE, RequestExecutor, RequestTemplate};
pub use linked::LinkedCursor;
pub use page::Page;
pub use transport::{Transport, TransportRequest, TransportResponse};

pub use sequoia_auth::{
    AuthConfig, AuthError, ClientGrantConfig, CredentialProvider, SecretString, SeedToken,
};
