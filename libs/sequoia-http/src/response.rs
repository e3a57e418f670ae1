use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::BodyExt;

/// Boxed response body; already decompressed when the server compressed it.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// A response whose body has not been read yet.
///
/// Every status is returned as is; callers classify it. Body reads enforce
/// the configured `max_body_size` limit.
#[derive(Debug)]
pub struct HttpResponse {
    pub(crate) inner: Response<ResponseBody>,
    pub(crate) max_body_size: usize,
}

impl HttpResponse {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Split into status, headers and the full body, without a status check.
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit, or
    /// `HttpError::Transport` if reading it fails.
    pub async fn into_parts(self) -> Result<(StatusCode, HeaderMap, Bytes), HttpError> {
        let status = self.inner.status();
        let headers = self.inner.headers().clone();
        let body = read_body_limited(self.inner, self.max_body_size).await?;
        Ok((status, headers, body))
    }

    /// Read the body without a status check.
    ///
    /// # Errors
    /// Returns `HttpError::BodyTooLarge` if the body exceeds the limit.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        read_body_limited(self.inner, self.max_body_size).await
    }
}

/// The limit applies to decompressed bytes.
async fn read_body_limited(
    response: Response<ResponseBody>,
    limit: usize,
) -> Result<Bytes, HttpError> {
    let mut body = std::pin::pin!(response.into_body());
    let mut collected = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            let actual = collected.len() + chunk.len();
            if actual > limit {
                return Err(HttpError::BodyTooLarge { limit, actual });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn response(status: u16, body: &'static str) -> HttpResponse {
        let body: ResponseBody = Full::new(Bytes::from_static(body.as_bytes()))
            .map_err(|never| match never {})
            .boxed();
        HttpResponse {
            inner: Response::builder()
                .status(status)
                .header("content-type", "application/vnd.piksel+json")
                .body(body)
                .unwrap(),
            max_body_size: 64,
        }
    }

    #[tokio::test]
    async fn into_parts_ignores_status() {
        let (status, headers, body) = response(404, "{\"error\":\"Not Found\"}")
            .into_parts()
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(headers["content-type"], "application/vnd.piksel+json");
        assert_eq!(&body[..], b"{\"error\":\"Not Found\"}");
    }

    #[tokio::test]
    async fn body_limit_is_enforced() {
        let long = "x".repeat(65).leak();
        let err = response(200, long).bytes().await.unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { limit: 64, actual: 65 }));
    }
}
