use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use http::header::AUTHORIZATION;
use sequoia_http::{HttpClient, HttpClientBuilder, HttpClientConfig};
use sequoia_utils::SecretString;
use serde::Deserialize;
use url::Url;
use zeroize::Zeroizing;

use crate::config::{ClientAuthMethod, ClientGrantConfig};
use crate::error::AuthError;
use crate::http_error::format_http_error;

/// A freshly issued token.
#[derive(Debug)]
pub struct TokenGrant {
    pub access_token: SecretString,
    /// `None` when the endpoint gave no lifetime.
    pub expires_in: Option<Duration>,
}

/// One round trip to a credential endpoint.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// # Errors
    /// Returns [`AuthError`] when the endpoint rejects the request or answers
    /// with an unusable payload.
    async fn exchange(&self) -> Result<TokenGrant, AuthError>;
}

/// Deserialize-only so a token cannot be serialized into logs by accident.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
}

/// `grant_type=client_credentials` against an `OAuth2` token endpoint.
pub struct ClientCredentialsExchange {
    client: HttpClient,
    token_endpoint: Url,
    client_id: String,
    client_secret: SecretString,
    /// Space-joined, `None` when no scopes are configured.
    scopes: Option<String>,
    auth_method: ClientAuthMethod,
}

impl std::fmt::Debug for ClientCredentialsExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentialsExchange")
            .field("token_endpoint", &self.token_endpoint.as_str())
            .field("client_id", &self.client_id)
            .field("auth_method", &self.auth_method)
            .finish_non_exhaustive()
    }
}

impl ClientCredentialsExchange {
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if `token_endpoint` is unset, and
    /// [`AuthError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &ClientGrantConfig) -> Result<Self, AuthError> {
        let token_endpoint = config
            .token_endpoint
            .clone()
            .ok_or_else(|| AuthError::Config("token_endpoint is required".into()))?;

        let http_config = config
            .http_config
            .clone()
            .unwrap_or_else(HttpClientConfig::token_endpoint);
        let client = HttpClientBuilder::with_config(http_config)
            .build()
            .map_err(|e| AuthError::Http(format_http_error(&e, "OAuth2 token")))?;

        let scopes = (!config.scopes.is_empty()).then(|| config.scopes.join(" "));

        Ok(Self {
            client,
            token_endpoint,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scopes,
            auth_method: config.auth_method,
        })
    }
}

#[async_trait]
impl TokenExchange for ClientCredentialsExchange {
    async fn exchange(&self) -> Result<TokenGrant, AuthError> {
        let mut fields: Vec<(&str, &str)> = vec![("grant_type", "client_credentials")];
        if let Some(scope) = &self.scopes {
            fields.push(("scope", scope.as_str()));
        }

        let secret;
        if self.auth_method == ClientAuthMethod::Form {
            secret = Zeroizing::new(self.client_secret.expose().to_owned());
            fields.push(("client_id", self.client_id.as_str()));
            fields.push(("client_secret", secret.as_str()));
        }

        let mut request = self.client.post(self.token_endpoint.as_str());
        if self.auth_method == ClientAuthMethod::Basic {
            let pair = Zeroizing::new(format!(
                "{}:{}",
                self.client_id,
                self.client_secret.expose()
            ));
            let header = Zeroizing::new(format!(
                "Basic {}",
                general_purpose::STANDARD.encode(pair.as_bytes())
            ));
            request = request.header(AUTHORIZATION.as_str(), header.as_str());
        }

        let response = request
            .form(&fields)
            .map_err(|e| AuthError::Http(format_http_error(&e, "OAuth2 token")))?
            .send()
            .await
            .map_err(|e| AuthError::Http(format_http_error(&e, "OAuth2 token")))?;

        if !response.status().is_success() {
            return Err(AuthError::Rejected {
                status: response.status(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::Http(format_http_error(&e, "OAuth2 token")))?;
        let parsed: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;

        if let Some(token_type) = &parsed.token_type
            && !token_type.eq_ignore_ascii_case("bearer")
        {
            return Err(AuthError::UnsupportedTokenType(token_type.clone()));
        }
        if parsed.access_token.is_empty() {
            return Err(AuthError::InvalidResponse("empty access_token".into()));
        }

        Ok(TokenGrant {
            access_token: SecretString::new(parsed.access_token),
            expires_in: parsed.expires_in.map(Duration::from_secs),
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn grant_config(server: &MockServer) -> ClientGrantConfig {
        let mut config = ClientGrantConfig::new("piksel-workflow", "blablabla")
            .with_token_endpoint(Url::parse(&server.url("/oauth/token")).unwrap());
        config.http_config = Some(HttpClientConfig::for_testing());
        config
    }

    #[tokio::test]
    async fn basic_auth_exchange() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .header(
                    "authorization",
                    // base64("piksel-workflow:blablabla")
                    "Basic cGlrc2VsLXdvcmtmbG93OmJsYWJsYWJsYQ==",
                )
                .body("grant_type=client_credentials");
            then.status(200).json_body(serde_json::json!({
                "access_token": "tok-123",
                "token_type": "Bearer",
                "expires_in": 3600,
            }));
        });

        let exchange = ClientCredentialsExchange::new(&grant_config(&server)).unwrap();
        let grant = exchange.exchange().await.unwrap();

        assert_eq!(grant.access_token.expose(), "tok-123");
        assert_eq!(grant.expires_in, Some(Duration::from_secs(3600)));
        mock.assert();
    }

    #[tokio::test]
    async fn form_auth_sends_credentials_in_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_includes("client_id=piksel-workflow")
                .body_includes("client_secret=blablabla")
                .body_includes("scope=read+write");
            then.status(200).json_body(serde_json::json!({"access_token": "tok"}));
        });

        let mut config = grant_config(&server);
        config.auth_method = ClientAuthMethod::Form;
        config.scopes = vec!["read".into(), "write".into()];

        let grant = ClientCredentialsExchange::new(&config)
            .unwrap()
            .exchange()
            .await
            .unwrap();
        assert_eq!(grant.expires_in, None);
        mock.assert();
    }

    #[tokio::test]
    async fn non_2xx_is_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(401).json_body(serde_json::json!({"error": "invalid_client"}));
        });

        let err = ClientCredentialsExchange::new(&grant_config(&server))
            .unwrap()
            .exchange()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::Rejected { status } if status == http::StatusCode::UNAUTHORIZED
        ));
    }

    #[tokio::test]
    async fn malformed_payload_is_invalid_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(200).body("<html>oops</html>");
        });

        let err = ClientCredentialsExchange::new(&grant_config(&server))
            .unwrap()
            .exchange()
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn non_bearer_token_type_is_refused() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(200)
                .json_body(serde_json::json!({"access_token": "tok", "token_type": "mac"}));
        });

        let err = ClientCredentialsExchange::new(&grant_config(&server))
            .unwrap()
            .exchange()
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedTokenType(ref t) if t == "mac"));
    }

    #[test]
    fn missing_endpoint_is_config_error() {
        let err = ClientCredentialsExchange::new(&ClientGrantConfig::new("id", "secret"))
            .unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }
}
