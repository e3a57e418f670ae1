#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use http::HeaderValue;
use httpmock::MockServer;
use parking_lot::Mutex;
use sequoia_client::{
    Client, ClientConfig, CredentialProvider, Transport, TransportRequest, TransportResponse,
};
use sequoia_http::{HttpClient, HttpError};
use sequoia_utils::ManualClock;
use url::Url;

pub const OWNER: &str = "testmock";

/// Header carrying the 1-based sequence number of each request sent.
pub const SEQUENCE_HEADER: &str = "x-test-sequence";

/// Real HTTP transport that remembers every request.
#[derive(Debug)]
pub struct Recording {
    inner: HttpClient,
    seen: Mutex<Vec<TransportRequest>>,
}

impl Recording {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HttpClient::builder().allow_insecure_http().build().unwrap(),
            seen: Mutex::default(),
        })
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.seen.lock().clone()
    }

    pub fn correlation_ids(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r.headers["x-correlation-id"].to_str().unwrap().to_owned())
            .collect()
    }
}

#[async_trait]
impl Transport for Recording {
    async fn send(&self, mut request: TransportRequest) -> Result<TransportResponse, HttpError> {
        let sequence = {
            let mut seen = self.seen.lock();
            seen.push(request.clone());
            seen.len()
        };
        request
            .headers
            .insert(SEQUENCE_HEADER, HeaderValue::from(sequence));
        self.inner.send(request).await
    }
}

pub fn config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        allow_insecure_http: true,
        ..ClientConfig::default()
    }
    .with_service("metadata", Url::parse(&server.base_url()).unwrap())
    .with_service("identity", Url::parse(&server.base_url()).unwrap())
}

/// Client over `transport` with no credentials and a virtual clock.
pub fn client(config: &ClientConfig, transport: Arc<Recording>) -> (Client, ManualClock) {
    let clock = ManualClock::new();
    let client = Client::with_transport(
        config,
        transport,
        CredentialProvider::no_auth(),
        Arc::new(clock.clone()),
    )
    .unwrap();
    (client, clock)
}
