//! Client configuration, layered with figment:
//! defaults, then an optional YAML file, then `SEQUOIA__*` environment
//! variables (`__` separates nested keys), then explicit overrides.
//!
//! ```yaml
//! services:
//!   identity: https://identity.example.com
//!   metadata: https://metadata.example.com
//! auth:
//!   type: client_grant
//!   client_id: my-client
//!   client_secret: s3cret
//! backoff:
//!   wait_gen: exponential
//!   interval: 500ms
//!   max_tries: 5
//!   retry_status_codes: [404, 409]
//! user_id: user123
//! application_id: app101
//! retry_when_empty_result:
//!   contents: true
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use http::HeaderValue;
use sequoia_auth::AuthConfig;
use sequoia_http::{DEFAULT_USER_AGENT, HttpClientConfig, TlsConfig, TransportSecurity};
use serde::Deserialize;
use url::Url;

use crate::backoff::BackoffConfig;
use crate::completeness::RetrySpec;
use crate::correlation::CorrelationConfig;
use crate::cursor::join_location;
use crate::error::SdkError;
use crate::executor::DEFAULT_CONTENT_TYPE;

/// Prefix of environment variables read by [`ClientConfig::figment`].
pub const ENV_PREFIX: &str = "SEQUOIA__";

/// Service whose location hosts `/oauth/token` unless `token_endpoint` is set.
pub const IDENTITY_SERVICE: &str = "identity";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Service name to base location.
    pub services: BTreeMap<String, Url>,
    pub auth: AuthConfig,
    /// Overrides `<services.identity>/oauth/token`.
    pub token_endpoint: Option<Url>,
    #[serde(alias = "backoff_strategy")]
    pub backoff: BackoffConfig,
    /// Sent as `Content-Type` and `Accept`.
    pub content_type: String,
    #[serde(flatten)]
    pub correlation: CorrelationConfig,
    /// Client-wide default; a per-call spec replaces it entirely.
    pub retry_when_empty_result: Option<RetrySpec>,
    pub user_agent: String,
    #[serde(with = "sequoia_utils::humantime_serde")]
    pub request_timeout: Duration,
    /// Accept `http://` locations. Meant for local mock services.
    pub allow_insecure_http: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            services: BTreeMap::new(),
            auth: AuthConfig::NoAuth,
            token_endpoint: None,
            backoff: BackoffConfig::default(),
            content_type: DEFAULT_CONTENT_TYPE.to_owned(),
            correlation: CorrelationConfig::default(),
            retry_when_empty_result: None,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            request_timeout: Duration::from_secs(240),
            allow_insecure_http: false,
        }
    }
}

impl ClientConfig {
    /// The provider stack without explicit overrides.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load from `path` and the environment.
    ///
    /// # Errors
    ///
    /// [`SdkError::Config`] when a layer cannot be parsed or the result is
    /// invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, SdkError> {
        Self::from_figment(&Self::figment(path))
    }

    /// Like [`load`](Self::load), with `overrides` merged on top.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn load_with_overrides(
        path: Option<&Path>,
        overrides: &serde_json::Value,
    ) -> Result<Self, SdkError> {
        Self::from_figment(&Self::figment(path).merge(Serialized::globals(overrides)))
    }

    /// # Errors
    ///
    /// [`SdkError::Config`] when extraction or validation fails.
    pub fn from_figment(figment: &Figment) -> Result<Self, SdkError> {
        let config: Self = figment
            .extract()
            .map_err(|e| SdkError::Config(format!("failed to load client config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_service(mut self, name: impl Into<String>, location: Url) -> Self {
        self.services.insert(name.into(), location);
        self
    }

    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// # Errors
    ///
    /// [`SdkError::Config`] naming the first invalid setting.
    pub fn validate(&self) -> Result<(), SdkError> {
        self.auth
            .validate()
            .map_err(|e| SdkError::Config(e.to_string()))?;
        self.backoff.validate().map_err(SdkError::Config)?;
        HeaderValue::from_str(&self.content_type)
            .map_err(|e| SdkError::Config(format!("invalid content_type: {e}")))?;
        if self.content_type.is_empty() {
            return Err(SdkError::Config("content_type must not be empty".to_owned()));
        }
        if self.request_timeout.is_zero() {
            return Err(SdkError::Config("request_timeout must be positive".to_owned()));
        }
        Ok(())
    }

    /// Where client credentials are exchanged, for the `client_grant`
    /// strategy; `None` for every other strategy.
    ///
    /// # Errors
    ///
    /// [`SdkError::Config`] if no endpoint is configured and there is no
    /// identity service to derive one from.
    pub fn resolve_token_endpoint(&self) -> Result<Option<Url>, SdkError> {
        let AuthConfig::ClientGrant(grant) = &self.auth else {
            return Ok(None);
        };
        if let Some(endpoint) = self.token_endpoint.as_ref().or(grant.token_endpoint.as_ref()) {
            return Ok(Some(endpoint.clone()));
        }
        let identity = self.services.get(IDENTITY_SERVICE).ok_or_else(|| {
            SdkError::Config(format!(
                "client_grant needs token_endpoint or a '{IDENTITY_SERVICE}' service location"
            ))
        })?;
        join_location(identity, "/oauth/token").map(Some)
    }

    /// Transport settings for resource services.
    #[must_use]
    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            request_timeout: self.request_timeout,
            user_agent: self.user_agent.clone(),
            transport: self.transport_security(),
            tls: self
                .auth
                .mutual_tls()
                .map_or(TlsConfig::WebPki, |tls| TlsConfig::Mutual(tls.clone())),
            ..HttpClientConfig::default()
        }
    }

    /// Auth settings with the token endpoint and its transport filled in.
    ///
    /// # Errors
    ///
    /// See [`resolve_token_endpoint`](Self::resolve_token_endpoint).
    pub fn resolved_auth(&self) -> Result<AuthConfig, SdkError> {
        let mut auth = self.auth.clone();
        let endpoint = self.resolve_token_endpoint()?;
        if let AuthConfig::ClientGrant(grant) = &mut auth {
            grant.token_endpoint = endpoint;
            let mut http = grant
                .http_config
                .take()
                .unwrap_or_else(HttpClientConfig::token_endpoint);
            http.transport = self.transport_security();
            http.user_agent.clone_from(&self.user_agent);
            grant.http_config = Some(http);
        }
        Ok(auth)
    }

    fn transport_security(&self) -> TransportSecurity {
        if self.allow_insecure_http {
            TransportSecurity::AllowInsecureHttp
        } else {
            TransportSecurity::TlsOnly
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::backoff::WaitGen;
    use figment::Jail;
    use sequoia_auth::ClientGrantConfig;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.content_type, "application/vnd.piksel+json");
        assert_eq!(config.request_timeout, Duration::from_secs(240));
        assert_eq!(config.backoff.max_tries, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sequoia.yaml",
                r"
services:
  identity: https://identity.example.com
  metadata: https://metadata.example.com
auth:
  type: client_grant
  client_id: my-client
  client_secret: s3cret
backoff:
  wait_generator: exponential
  interval: 500ms
  max_tries: 3
  retry_http_status_codes: [404, 409]
user_id: user123
application_id: app101
retry_when_empty_result:
  contents: true
  assets: false
request_timeout: 30s
",
            )?;
            jail.set_env("SEQUOIA__BACKOFF__MAX_TRIES", "7");
            jail.set_env("SEQUOIA__APPLICATION_ID", "app202");

            let config = ClientConfig::load(Some(Path::new("sequoia.yaml")))
                .map_err(|e| e.to_string())?;

            assert_eq!(config.backoff.wait_gen, WaitGen::Exponential);
            assert_eq!(config.backoff.interval, Duration::from_millis(500));
            assert_eq!(config.backoff.max_tries, 7);
            assert!(config.backoff.retry_status_codes.contains(&409));
            assert_eq!(config.correlation.user_id.as_deref(), Some("user123"));
            assert_eq!(config.correlation.application_id.as_deref(), Some("app202"));
            assert_eq!(
                config.retry_when_empty_result,
                Some(RetrySpec::per_group([("contents", true), ("assets", false)]))
            );
            assert_eq!(config.request_timeout, Duration::from_secs(30));
            assert_eq!(
                config.resolve_token_endpoint().map_err(|e| e.to_string())?.map(String::from),
                Some("https://identity.example.com/oauth/token".to_owned())
            );
            Ok(())
        });
    }

    #[test]
    fn boolean_retry_spec_and_overrides() {
        Jail::expect_with(|_| {
            let config = ClientConfig::load_with_overrides(
                None,
                &serde_json::json!({
                    "retry_when_empty_result": true,
                    "auth": {"type": "byo_token", "token": "abc"},
                }),
            )
            .map_err(|e| e.to_string())?;
            assert_eq!(config.retry_when_empty_result, Some(RetrySpec::AllGroups(true)));
            assert_eq!(config.auth.kind(), "byo_token");
            assert_eq!(config.resolve_token_endpoint().map_err(|e| e.to_string())?, None);
            Ok(())
        });
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let empty_secret =
            ClientConfig::default().with_auth(AuthConfig::ClientGrant(ClientGrantConfig::new("id", "")));
        assert!(matches!(empty_secret.validate(), Err(SdkError::Config(_))));

        let no_tries = ClientConfig::default().with_backoff(BackoffConfig {
            max_tries: 0,
            ..BackoffConfig::default()
        });
        assert!(matches!(no_tries.validate(), Err(SdkError::Config(_))));

        let bad_type = ClientConfig {
            content_type: "bad\ntype".to_owned(),
            ..ClientConfig::default()
        };
        assert!(bad_type.validate().is_err());
    }

    #[test]
    fn grant_without_identity_needs_endpoint() {
        let config = ClientConfig::default()
            .with_auth(AuthConfig::ClientGrant(ClientGrantConfig::new("id", "secret")));
        assert!(matches!(config.resolve_token_endpoint(), Err(SdkError::Config(_))));

        let explicit = ClientConfig {
            token_endpoint: Some(Url::parse("https://auth.example.com/token").unwrap()),
            ..config
        };
        let auth = explicit.resolved_auth().unwrap();
        let AuthConfig::ClientGrant(grant) = auth else {
            panic!("expected client grant");
        };
        assert_eq!(
            grant.token_endpoint.unwrap().as_str(),
            "https://auth.example.com/token"
        );
        assert!(grant.http_config.is_some());
    }

    #[test]
    fn mutual_auth_selects_mutual_tls_and_insecure_switch() {
        let config = ClientConfig {
            allow_insecure_http: true,
            ..ClientConfig::default().with_auth(AuthConfig::Mutual(
                sequoia_http::MutualTlsConfig {
                    client_cert_path: "client.pem".into(),
                    client_key_path: "client.key".into(),
                    server_cert_path: "server.pem".into(),
                },
            ))
        };
        let http = config.http_config();
        assert!(matches!(http.tls, TlsConfig::Mutual(_)));
        assert_eq!(http.transport, TransportSecurity::AllowInsecureHttp);
    }
}
