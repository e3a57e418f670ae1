use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use sequoia_http::{HttpClient, HttpError};
use url::Url;

/// One fully prepared HTTP request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// A response with its body fully read.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Sends a single request; every status code is a successful send.
///
/// Only failures where no response arrived are errors. The executor retries
/// those whose [`HttpError::is_transport_failure`] is `true`.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, HttpError>;
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, HttpError> {
        let mut builder = self
            .request(request.method, request.url.as_str())
            .typed_headers(&request.headers);
        if let Some(body) = request.body {
            builder = builder.body_bytes(body);
        }

        let (status, headers, body) = builder.send().await?.into_parts().await?;
        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}
