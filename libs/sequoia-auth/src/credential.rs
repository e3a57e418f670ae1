use std::time::Duration;

use sequoia_utils::SecretString;
use tokio::time::Instant;
use zeroize::Zeroizing;

/// When a credential stops being valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    At(Instant),
    Unbounded,
}

/// An access credential as handed out by the provider.
///
/// `token` is `None` for strategies that send no bearer token (`NoAuth`,
/// `Mutual`).
#[derive(Debug, Clone)]
pub struct Credential {
    token: Option<SecretString>,
    expiry: Expiry,
    refreshable: bool,
    /// Moment the provider stops handing this credential out.
    renew_at: Option<Instant>,
}

impl Credential {
    /// No bearer token.
    #[must_use]
    pub fn none() -> Self {
        Self {
            token: None,
            expiry: Expiry::Unbounded,
            refreshable: false,
            renew_at: None,
        }
    }

    /// A token that is used as-is forever.
    #[must_use]
    pub fn fixed(token: SecretString) -> Self {
        Self {
            token: Some(token),
            expiry: Expiry::Unbounded,
            refreshable: false,
            renew_at: None,
        }
    }

    /// A refreshable token issued at `issued_at`.
    ///
    /// `lifetime = None` means the token never expires. `skew` moves the renewal
    /// point earlier but never past half of the lifetime.
    #[must_use]
    pub fn expiring(
        token: SecretString,
        issued_at: Instant,
        lifetime: Option<Duration>,
        skew: Duration,
    ) -> Self {
        let (expiry, renew_at) = match lifetime {
            Some(lifetime) => {
                let skew = skew.min(lifetime / 2);
                (
                    Expiry::At(issued_at + lifetime),
                    Some(issued_at + lifetime.saturating_sub(skew)),
                )
            }
            None => (Expiry::Unbounded, None),
        };
        Self {
            token: Some(token),
            expiry,
            refreshable: true,
            renew_at,
        }
    }

    #[must_use]
    pub fn token(&self) -> Option<&SecretString> {
        self.token.as_ref()
    }

    #[must_use]
    pub fn expiry(&self) -> Expiry {
        self.expiry
    }

    #[must_use]
    pub fn is_refreshable(&self) -> bool {
        self.refreshable
    }

    /// Whether the provider may still hand this credential out at `now`.
    #[must_use]
    pub fn is_usable_at(&self, now: Instant) -> bool {
        self.renew_at.is_none_or(|renew_at| now < renew_at)
    }

    /// `Bearer <token>`, or `None` when no header should be sent.
    #[must_use]
    pub fn authorization_header(&self) -> Option<Zeroizing<String>> {
        self.token
            .as_ref()
            .map(|token| Zeroizing::new(format!("Bearer {}", token.expose())))
    }
}
