use thiserror::Error;

/// Failure to obtain a credential.
///
/// No variant ever renders a client secret or token. These errors are never
/// retried by the request backoff policy.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The token endpoint answered with a non-2xx status.
    #[error("token endpoint rejected the exchange: HTTP {status}")]
    Rejected { status: http::StatusCode },

    /// Transport failure talking to the token endpoint.
    ///
    /// Produced by [`format_http_error`](crate::http_error::format_http_error).
    #[error("{0}")]
    Http(String),

    /// Unparseable or incomplete token payload.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// `token_type` present but not `bearer`.
    #[error("unsupported token type: {0}")]
    UnsupportedTokenType(String),

    #[error("auth config error: {0}")]
    Config(String),

    /// Mutual TLS material could not be loaded.
    #[error("mutual TLS setup failed: {0}")]
    Tls(String),
}
