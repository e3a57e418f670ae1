use std::collections::BTreeMap;
use std::sync::Arc;

use sequoia_auth::{AuthError, CredentialProvider};
use sequoia_http::{HttpClientBuilder, HttpError};
use sequoia_utils::Clock;
use url::Url;

use crate::backoff::BackoffPolicy;
use crate::completeness::RetrySpec;
use crate::config::ClientConfig;
use crate::correlation::CorrelationContext;
use crate::endpoint::{BusinessEndpoint, ResourceEndpoint};
use crate::error::SdkError;
use crate::executor::RequestExecutor;
use crate::transport::Transport;

/// State every endpoint of one client shares.
#[derive(Debug)]
pub struct Shared {
    pub(crate) executor: RequestExecutor,
    pub(crate) correlation: CorrelationContext,
    pub(crate) retry_spec: Option<RetrySpec>,
}

/// Entry point of the SDK.
///
/// Clones are cheap and share the connection pool and the cached token.
///
/// ```ignore
/// let client = Client::new(&ClientConfig::load(Some(Path::new("sequoia.yaml")))?)?;
/// let contents = client.service("metadata")?.resource("contents")?;
/// let mut pages = contents.browse("testmock", BrowseOptions::default()).await?;
/// while let Some(page) = pages.next().await? {
///     println!("{} contents", page.resources().len());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    shared: Arc<Shared>,
    services: Arc<BTreeMap<String, Url>>,
}

impl Client {
    /// Build the HTTP transport and credential provider described by `config`.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`SdkError::Config`] for invalid settings
    /// - [`SdkError::Authentication`] if mutual TLS material cannot be loaded
    pub fn new(config: &ClientConfig) -> Result<Self, SdkError> {
        config.validate()?;
        let http = HttpClientBuilder::with_config(config.http_config())
            .build()
            .map_err(|e| match e {
                HttpError::Tls(source) => SdkError::Authentication(AuthError::Tls(source.to_string())),
                other => SdkError::Config(format!("cannot build HTTP client: {other}")),
            })?;
        let credentials = CredentialProvider::from_config(&config.resolved_auth()?)?;

        tracing::info!(
            auth = credentials.kind(),
            services = config.services.len(),
            "sequoia client ready"
        );
        Self::assemble(config, RequestExecutor::new(Arc::new(http), credentials))
    }

    /// Build a client over a caller-provided transport, credentials and clock.
    ///
    /// # Errors
    ///
    /// [`SdkError::Config`] for invalid settings.
    pub fn with_transport(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        credentials: CredentialProvider,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SdkError> {
        config.validate()?;
        Self::assemble(
            config,
            RequestExecutor::new(transport, credentials).with_clock(clock),
        )
    }

    fn assemble(config: &ClientConfig, executor: RequestExecutor) -> Result<Self, SdkError> {
        let executor = executor
            .with_policy(BackoffPolicy::from_config(&config.backoff))
            .with_content_type(&config.content_type)?;
        Ok(Self {
            shared: Arc::new(Shared {
                executor,
                correlation: CorrelationContext::new(&config.correlation)?,
                retry_spec: config.retry_when_empty_result.clone(),
            }),
            services: Arc::new(config.services.clone()),
        })
    }

    /// # Errors
    ///
    /// [`SdkError::UnknownService`] if `name` has no configured location.
    pub fn service(&self, name: &str) -> Result<ServiceHandle, SdkError> {
        let location = self
            .services
            .get(name)
            .ok_or_else(|| SdkError::UnknownService(name.to_owned()))?;
        Ok(ServiceHandle {
            shared: Arc::clone(&self.shared),
            name: name.to_owned(),
            location: location.clone(),
        })
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    #[must_use]
    pub fn executor(&self) -> &RequestExecutor {
        &self.shared.executor
    }

    #[must_use]
    pub fn correlation(&self) -> &CorrelationContext {
        &self.shared.correlation
    }
}

/// One configured service.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    shared: Arc<Shared>,
    name: String,
    location: Url,
}

impl ServiceHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// # Errors
    ///
    /// [`SdkError::InvalidUrl`] if `<location>/data/<resource>` is not a URL.
    pub fn resource(&self, resource: &str) -> Result<ResourceEndpoint, SdkError> {
        ResourceEndpoint::new(Arc::clone(&self.shared), self.location.clone(), resource)
    }

    #[must_use]
    pub fn business(&self, path_template: &str) -> BusinessEndpoint {
        BusinessEndpoint::new(
            Arc::clone(&self.shared),
            self.location.clone(),
            path_template,
        )
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use sequoia_http::HttpClient;
    use sequoia_utils::ManualClock;

    fn client() -> Client {
        let config = ClientConfig::default()
            .with_service("metadata", Url::parse("http://metadata.example.com/").unwrap());
        let http = HttpClient::builder().allow_insecure_http().build().unwrap();
        Client::with_transport(
            &config,
            Arc::new(http),
            CredentialProvider::no_auth(),
            Arc::new(ManualClock::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn known_service_resolves_endpoints() {
        let client = client();
        let metadata = client.service("metadata").unwrap();
        assert_eq!(metadata.name(), "metadata");

        let contents = metadata.resource("contents").unwrap();
        assert_eq!(
            contents.url().as_str(),
            "http://metadata.example.com/data/contents"
        );
        assert_eq!(
            metadata.business("/ingest/${owner}").template(),
            "/ingest/${owner}"
        );
        assert_eq!(client.service_names().collect::<Vec<_>>(), vec!["metadata"]);
    }

    #[tokio::test]
    async fn unknown_service_is_a_usage_error() {
        let err = client().service("workflow").unwrap_err();
        assert!(matches!(&err, SdkError::UnknownService(name) if name == "workflow"));
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[tokio::test]
    async fn missing_mutual_tls_files_fail_construction() {
        let config = ClientConfig::default().with_auth(sequoia_auth::AuthConfig::Mutual(
            sequoia_http::MutualTlsConfig {
                client_cert_path: "/nonexistent/client.pem".into(),
                client_key_path: "/nonexistent/client.key".into(),
                server_cert_path: "/nonexistent/server.pem".into(),
            },
        ));
        let err = Client::new(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }
}
