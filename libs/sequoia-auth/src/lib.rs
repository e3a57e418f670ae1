#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![forbid(unsafe_code)]

//! Credential strategies for Sequoia services.
//!
//! A client is configured with exactly one [`AuthConfig`] variant:
//!
//! - `ClientGrant`: `OAuth2` client credentials, refreshed on demand, with an
//!   optional seed token used until it expires
//! - `ByoToken`: a caller-supplied bearer token, never refreshed
//! - `NoAuth`: no `Authorization` header at all
//! - `Mutual`: no bearer token; the transport presents a client certificate
//!
//! [`CredentialProvider`] hides the strategy behind a single
//! [`current_token`](CredentialProvider::current_token) call.

mod config;
mod credential;
mod error;
mod exchange;
pub mod http_error;
mod provider;

pub use config::{AuthConfig, ClientAuthMethod, ClientGrantConfig, SeedToken};
pub use credential::{Credential, Expiry};
pub use error::AuthError;
pub use exchange::{ClientCredentialsExchange, TokenExchange, TokenGrant};
pub use provider::CredentialProvider;
pub use sequoia_utils::SecretString;
