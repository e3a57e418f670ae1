use crate::error::HttpError;
use http::header::{HeaderName, HeaderValue};
use http::{Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Tower layer that sets a header on every request that does not already carry it.
///
/// The client stack uses it for `User-Agent`; callers that pass their own value
/// per request win over the layer.
#[derive(Clone, Debug)]
pub struct DefaultHeaderLayer {
    name: HeaderName,
    value: HeaderValue,
}

impl DefaultHeaderLayer {
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if `value` is not a legal header value.
    pub fn try_new(name: HeaderName, value: impl AsRef<str>) -> Result<Self, HttpError> {
        let value = HeaderValue::from_str(value.as_ref())?;
        Ok(Self { name, value })
    }

    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if `user_agent` is not a legal header value.
    pub fn user_agent(user_agent: impl AsRef<str>) -> Result<Self, HttpError> {
        Self::try_new(http::header::USER_AGENT, user_agent)
    }
}

impl<S> Layer<S> for DefaultHeaderLayer {
    type Service = DefaultHeaderService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DefaultHeaderService {
            inner,
            name: self.name.clone(),
            value: self.value.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DefaultHeaderService<S> {
    inner: S,
    name: HeaderName,
    value: HeaderValue,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for DefaultHeaderService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        if !req.headers().contains_key(&self.name) {
            req.headers_mut()
                .insert(self.name.clone(), self.value.clone());
        }
        self.inner.call(req)
    }
}
