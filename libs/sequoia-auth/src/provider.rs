use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use sequoia_utils::{Clock, TokioClock};

use crate::config::{AuthConfig, ClientGrantConfig};
use crate::credential::Credential;
use crate::error::AuthError;
use crate::exchange::{ClientCredentialsExchange, TokenExchange};

/// State shared by every clone of a client-grant provider.
struct GrantState {
    exchange: Arc<dyn TokenExchange>,
    clock: Arc<dyn Clock>,
    /// Lock-free reads; replaced only while `refresh_lock` is held.
    current: ArcSwapOption<Credential>,
    /// Serializes exchanges so concurrent callers share one round trip.
    refresh_lock: tokio::sync::Mutex<()>,
    default_ttl: Duration,
    refresh_skew: Duration,
}

impl GrantState {
    fn usable(&self) -> Option<Arc<Credential>> {
        let now = self.clock.now();
        self.current
            .load_full()
            .filter(|credential| credential.is_usable_at(now))
    }

    async fn refresh(&self) -> Result<Arc<Credential>, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have finished a refresh while we waited.
        if let Some(credential) = self.usable() {
            return Ok(credential);
        }

        tracing::debug!("requesting access token");
        let issued_at = self.clock.now();
        let grant = self.exchange.exchange().await.inspect_err(|e| {
            tracing::warn!(error = %e, "access token request failed");
        })?;

        let lifetime = grant.expires_in.unwrap_or(self.default_ttl);
        let credential = Arc::new(Credential::expiring(
            grant.access_token,
            issued_at,
            Some(lifetime),
            self.refresh_skew,
        ));
        self.current.store(Some(Arc::clone(&credential)));
        tracing::debug!(expires_in_secs = lifetime.as_secs(), "access token refreshed");
        Ok(credential)
    }
}

#[derive(Clone)]
enum Strategy {
    ClientGrant(Arc<GrantState>),
    Static(Arc<Credential>),
}

/// Hands out the credential to attach to each request.
///
/// Cheap to clone; clones share the cached token.
///
/// For `ClientGrant` the cached token is reused until it expires, then
/// exactly one exchange runs no matter how many callers are waiting. A
/// failed exchange is reported to every waiting caller and is not retried
/// here.
#[derive(Clone)]
pub struct CredentialProvider {
    strategy: Strategy,
    kind: &'static str,
}

impl fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl CredentialProvider {
    /// Build a provider for `config` using the tokio clock.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the config fails validation or a
    /// client grant has no token endpoint.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        config.validate()?;
        match config {
            AuthConfig::ClientGrant(grant) => {
                let exchange = Arc::new(ClientCredentialsExchange::new(grant)?);
                Ok(Self::client_grant(grant, exchange, Arc::new(TokioClock)))
            }
            other => Ok(Self::fixed(other)),
        }
    }

    /// Build a provider with an explicit exchange and time source.
    ///
    /// Non-grant configs ignore both.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the config fails validation.
    pub fn with_exchange(
        config: &AuthConfig,
        exchange: Arc<dyn TokenExchange>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        config.validate()?;
        match config {
            AuthConfig::ClientGrant(grant) => Ok(Self::client_grant(grant, exchange, clock)),
            other => Ok(Self::fixed(other)),
        }
    }

    fn client_grant(
        config: &ClientGrantConfig,
        exchange: Arc<dyn TokenExchange>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let seed = config.seed_token.as_ref().map(|seed| {
            Arc::new(Credential::expiring(
                seed.access_token.clone(),
                clock.now(),
                seed.expires_in.map(Duration::from_secs),
                Duration::ZERO,
            ))
        });
        if seed.is_some() {
            tracing::debug!("client grant starts from a seed token");
        }

        Self {
            strategy: Strategy::ClientGrant(Arc::new(GrantState {
                exchange,
                clock,
                current: ArcSwapOption::new(seed),
                refresh_lock: tokio::sync::Mutex::new(()),
                default_ttl: config.default_ttl,
                refresh_skew: config.refresh_skew,
            })),
            kind: "client_grant",
        }
    }

    fn fixed(config: &AuthConfig) -> Self {
        let credential = match config {
            AuthConfig::ByoToken { token } => Credential::fixed(token.clone()),
            _ => Credential::none(),
        };
        Self {
            strategy: Strategy::Static(Arc::new(credential)),
            kind: config.kind(),
        }
    }

    /// Provider that never sends an `Authorization` header.
    #[must_use]
    pub fn no_auth() -> Self {
        Self::fixed(&AuthConfig::NoAuth)
    }

    /// Strategy name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// The credential to use right now, refreshing it first if needed.
    ///
    /// # Errors
    ///
    /// Returns the [`AuthError`] of the token exchange when a refresh was
    /// needed and failed.
    pub async fn current_token(&self) -> Result<Arc<Credential>, AuthError> {
        match &self.strategy {
            Strategy::Static(credential) => Ok(Arc::clone(credential)),
            Strategy::ClientGrant(state) => match state.usable() {
                Some(credential) => Ok(credential),
                None => state.refresh().await,
            },
        }
    }

    /// Drop the cached token so the next call performs an exchange.
    ///
    /// The executor calls this when a service answers `401`.
    ///
    /// No-op for strategies without refresh.
    pub fn invalidate(&self) {
        if let Strategy::ClientGrant(state) = &self.strategy {
            state.current.store(None);
        }
    }
}
