#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP transport for the Sequoia client SDK
//!
//! A hyper-based client with:
//! - TLS via rustls (HTTPS only by default)
//! - Mutual TLS with a client certificate and a pinned server certificate
//! - Connection pooling
//! - Per-attempt timeouts
//! - User-Agent header injection
//! - Transparent response decompression (gzip, brotli, deflate)
//!
//! Retries are deliberately absent here: the request executor in
//! `sequoia-client` owns the retry loop so it can key off response
//! contents as well as status codes.
//!
//! # Example
//!
//! ```ignore
//! use sequoia_http::HttpClient;
//! use std::time::Duration;
//!
//! let client = HttpClient::builder()
//!     .timeout(Duration::from_secs(10))
//!     .user_agent("my-app/1.0")
//!     .build()?;
//!
//! let (status, headers, body) = client
//!     .get("https://metadata.example.com/data/contents")
//!     .send()
//!     .await?
//!     .into_parts()
//!     .await?;
//! ```

mod builder;
mod client;
mod config;
mod default_header;
mod error;
mod request;
mod response;
mod tls;

pub use builder::HttpClientBuilder;
pub use client::HttpClient;
pub use config::{
    DEFAULT_USER_AGENT, HttpClientConfig, MutualTlsConfig, TlsConfig, TransportSecurity,
};
pub use default_header::{DefaultHeaderLayer, DefaultHeaderService};
pub use error::{HttpError, InvalidUriKind};
pub use request::RequestBuilder;
pub use response::{HttpResponse, ResponseBody};
