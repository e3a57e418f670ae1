use std::time::Duration;

use sequoia_http::{HttpClientConfig, MutualTlsConfig};
use sequoia_utils::SecretString;
use serde::Deserialize;
use url::Url;

use crate::error::AuthError;

/// How client credentials travel to the token endpoint.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
    /// `Authorization: Basic base64(client_id:client_secret)`
    #[default]
    Basic,
    /// `client_id` and `client_secret` as form fields
    Form,
}

/// A token obtained out of band and used before the first exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedToken {
    pub access_token: SecretString,
    /// Seconds from client construction; absent means it never expires.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl SeedToken {
    pub fn new(access_token: impl Into<String>, expires_in: Option<Duration>) -> Self {
        Self {
            access_token: SecretString::new(access_token),
            expires_in: expires_in.map(|d| d.as_secs()),
        }
    }
}

/// `OAuth2` client credentials settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientGrantConfig {
    pub client_id: String,
    pub client_secret: SecretString,

    #[serde(default)]
    pub seed_token: Option<SeedToken>,

    /// Usually filled in by the client from the identity service location.
    #[serde(default)]
    pub token_endpoint: Option<Url>,

    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub auth_method: ClientAuthMethod,

    /// Lifetime assumed when the endpoint omits `expires_in` (default: 5 min).
    #[serde(default = "default_ttl", with = "sequoia_utils::humantime_serde")]
    pub default_ttl: Duration,

    /// Treat a token as expired this long before its real expiry (default: 0).
    ///
    /// Capped at half of each token's lifetime.
    #[serde(default, with = "sequoia_utils::humantime_serde")]
    pub refresh_skew: Duration,

    /// Transport settings for the token endpoint; `None` uses
    /// [`HttpClientConfig::token_endpoint`].
    #[serde(skip)]
    pub http_config: Option<HttpClientConfig>,
}

fn default_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

impl ClientGrantConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::new(client_secret),
            seed_token: None,
            token_endpoint: None,
            scopes: Vec::new(),
            auth_method: ClientAuthMethod::default(),
            default_ttl: default_ttl(),
            refresh_skew: Duration::ZERO,
            http_config: None,
        }
    }

    #[must_use]
    pub fn with_seed_token(mut self, seed: SeedToken) -> Self {
        self.seed_token = Some(seed);
        self
    }

    #[must_use]
    pub fn with_token_endpoint(mut self, endpoint: Url) -> Self {
        self.token_endpoint = Some(endpoint);
        self
    }
}

/// Authentication strategy, chosen once per client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    ClientGrant(ClientGrantConfig),
    ByoToken {
        token: SecretString,
    },
    #[default]
    NoAuth,
    Mutual(MutualTlsConfig),
}

impl AuthConfig {
    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClientGrant(_) => "client_grant",
            Self::ByoToken { .. } => "byo_token",
            Self::NoAuth => "no_auth",
            Self::Mutual(_) => "mutual",
        }
    }

    /// Certificate material the transport must present, if any.
    #[must_use]
    pub fn mutual_tls(&self) -> Option<&MutualTlsConfig> {
        match self {
            Self::Mutual(tls) => Some(tls),
            _ => None,
        }
    }

    /// # Errors
    ///
    /// Returns [`AuthError::Config`] when a required field of the active
    /// variant is empty.
    pub fn validate(&self) -> Result<(), AuthError> {
        match self {
            Self::ClientGrant(grant) => {
                if grant.client_id.trim().is_empty() {
                    return Err(AuthError::Config("client_id must not be empty".into()));
                }
                if grant.client_secret.is_empty() {
                    return Err(AuthError::Config("client_secret must not be empty".into()));
                }
                Ok(())
            }
            Self::ByoToken { token } if token.is_empty() => {
                Err(AuthError::Config("byo token must not be empty".into()))
            }
            Self::Mutual(tls) => {
                let paths = [
                    ("client_cert_path", &tls.client_cert_path),
                    ("client_key_path", &tls.client_key_path),
                    ("server_cert_path", &tls.server_cert_path),
                ];
                match paths.iter().find(|(_, p)| p.as_os_str().is_empty()) {
                    Some((name, _)) => Err(AuthError::Config(format!("{name} must not be empty"))),
                    None => Ok(()),
                }
            }
            Self::ByoToken { .. } | Self::NoAuth => Ok(()),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_grant_from_tagged_map() {
        let config: AuthConfig = serde_json::from_value(json!({
            "type": "client_grant",
            "client_id": "piksel-workflow",
            "client_secret": "blablabla",
            "seed_token": {"access_token": "seed", "expires_in": 600},
            "default_ttl": "10m",
        }))
        .unwrap();

        let AuthConfig::ClientGrant(grant) = &config else {
            panic!("expected client grant, got {config:?}");
        };
        assert_eq!(grant.client_id, "piksel-workflow");
        assert_eq!(grant.default_ttl, Duration::from_secs(600));
        assert_eq!(grant.refresh_skew, Duration::ZERO);
        assert_eq!(grant.seed_token.as_ref().unwrap().expires_in, Some(600));
        config.validate().unwrap();
    }

    #[test]
    fn debug_never_shows_secrets() {
        let config = AuthConfig::ClientGrant(
            ClientGrantConfig::new("id", "top-secret")
                .with_seed_token(SeedToken::new("seed-value", None)),
        );
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("top-secret"));
        assert!(!rendered.contains("seed-value"));
    }

    #[test]
    fn mutual_from_tagged_map() {
        let config: AuthConfig = serde_json::from_value(json!({
            "type": "mutual",
            "client_cert_path": "/cert_path/client_cert.pm",
            "client_key_path": "/cert_path/client_key.pm",
            "server_cert_path": "/cert_path/server_cert.pm",
        }))
        .unwrap();
        assert_eq!(config.kind(), "mutual");
        assert!(config.mutual_tls().is_some());
    }

    #[test]
    fn validation_rejects_empty_fields() {
        let blank_id = AuthConfig::ClientGrant(ClientGrantConfig::new("  ", "secret"));
        assert!(matches!(blank_id.validate(), Err(AuthError::Config(_))));

        let blank_secret = AuthConfig::ClientGrant(ClientGrantConfig::new("id", ""));
        assert!(blank_secret.validate().is_err());

        let blank_token = AuthConfig::ByoToken {
            token: SecretString::new(""),
        };
        assert!(blank_token.validate().is_err());

        let blank_path = AuthConfig::Mutual(MutualTlsConfig {
            client_cert_path: "/c.pem".into(),
            client_key_path: "".into(),
            server_cert_path: "/s.pem".into(),
        });
        let err = blank_path.validate().unwrap_err();
        assert!(err.to_string().contains("client_key_path"));
    }

    #[test]
    fn default_is_no_auth() {
        assert!(matches!(AuthConfig::default(), AuthConfig::NoAuth));
        AuthConfig::NoAuth.validate().unwrap();
    }
}
