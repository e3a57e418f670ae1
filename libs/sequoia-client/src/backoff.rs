//! Retry decisions for the request executor.
//!
//! A [`BackoffPolicy`] is evaluated after every attempt. It stops once the
//! attempt or time budget is spent, retries transport failures and incomplete
//! results unconditionally, and retries HTTP statuses only when they are in the
//! configured set or signal a transient server condition.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use rand::Rng;
use serde::Deserialize;

/// Ceiling applied when `max_time` is not configured.
pub const DEFAULT_MAX_TIME: Duration = Duration::from_secs(120);

pub const DEFAULT_MAX_TRIES: u32 = 5;

/// Statuses retried even when absent from `retry_status_codes`.
pub const DEFAULT_RETRIABLE_STATUSES: [StatusCode; 4] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Longest single wait an exponential generator produces (one day).
const MAX_WAIT_SECS: f64 = 86_400.0;

/// Produces the wait before retry number `retry` (1 for the first retry).
pub trait WaitGenerator: Send + Sync + fmt::Debug {
    fn wait(&self, retry: u32) -> Duration;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitGen {
    #[default]
    Constant,
    Exponential,
}

/// Backoff settings as they appear in configuration.
///
/// `interval` is the constant wait, or the first wait of an exponential
/// sequence that grows by `factor` and is capped by `max_value`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(alias = "wait_generator")]
    pub wait_gen: WaitGen,
    #[serde(with = "sequoia_utils::humantime_serde")]
    pub interval: Duration,
    pub factor: f64,
    #[serde(with = "sequoia_utils::humantime_serde::option")]
    pub max_value: Option<Duration>,
    /// Add up to 25% random delay to exponential waits.
    pub jitter: bool,
    pub max_tries: u32,
    /// Total time budget; [`DEFAULT_MAX_TIME`] when unset.
    #[serde(with = "sequoia_utils::humantime_serde::option")]
    pub max_time: Option<Duration>,
    #[serde(alias = "retry_http_status_codes")]
    pub retry_status_codes: BTreeSet<u16>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            wait_gen: WaitGen::Constant,
            interval: Duration::ZERO,
            factor: 2.0,
            max_value: None,
            jitter: false,
            max_tries: DEFAULT_MAX_TRIES,
            max_time: None,
            retry_status_codes: BTreeSet::new(),
        }
    }
}

impl BackoffConfig {
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tries == 0 {
            return Err("backoff.max_tries must be at least 1".to_owned());
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(format!(
                "backoff.factor must be a finite number >= 1.0, got {}",
                self.factor
            ));
        }
        if let Some(code) = self
            .retry_status_codes
            .iter()
            .find(|code| StatusCode::from_u16(**code).is_err())
        {
            return Err(format!("backoff.retry_status_codes contains invalid status {code}"));
        }
        Ok(())
    }

    fn generator(&self) -> Arc<dyn WaitGenerator> {
        match self.wait_gen {
            WaitGen::Constant => Arc::new(Constant(self.interval)),
            WaitGen::Exponential => Arc::new(Exponential {
                base: self.interval,
                factor: self.factor,
                max_value: self.max_value,
                jitter: self.jitter,
            }),
        }
    }
}

/// Same wait before every retry.
#[derive(Debug, Clone, Copy)]
pub struct Constant(pub Duration);

impl WaitGenerator for Constant {
    fn wait(&self, _retry: u32) -> Duration {
        self.0
    }
}

/// `base * factor^(retry - 1)`, capped by `max_value`.
#[derive(Debug, Clone, Copy)]
pub struct Exponential {
    pub base: Duration,
    pub factor: f64,
    pub max_value: Option<Duration>,
    pub jitter: bool,
}

impl WaitGenerator for Exponential {
    fn wait(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = if self.factor.is_finite() && self.factor >= 1.0 {
            self.factor
        } else {
            1.0
        };
        let cap = self
            .max_value
            .map_or(MAX_WAIT_SECS, |max| max.as_secs_f64().min(MAX_WAIT_SECS));

        let raw = self.base.as_secs_f64() * factor.powi(exponent);
        let secs = if raw.is_finite() { raw.clamp(0.0, cap) } else { cap };
        let wait = Duration::from_secs_f64(secs);

        if self.jitter {
            let jitter = wait.mul_f64(rand::rng().random_range(0.0..=0.25));
            (wait + jitter).min(Duration::from_secs_f64(cap))
        } else {
            wait
        }
    }
}

/// What happened on the last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Connection failure or timeout; no response was received.
    TransportFailure,
    HttpResponse(StatusCode),
    /// A success response that failed the completeness check.
    IncompleteResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    RetryAfter(Duration),
    Stop,
}

/// Backoff settings resolved for execution.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    generator: Arc<dyn WaitGenerator>,
    max_tries: u32,
    max_time: Duration,
    retry_status_codes: BTreeSet<u16>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

impl BackoffPolicy {
    /// Resolve `config`, substituting [`DEFAULT_MAX_TIME`] for an unset
    /// `max_time`.
    #[must_use]
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            generator: config.generator(),
            max_tries: config.max_tries.max(1),
            max_time: config.max_time.unwrap_or(DEFAULT_MAX_TIME),
            retry_status_codes: config.retry_status_codes.clone(),
        }
    }

    /// Replace the configured wait generator.
    #[must_use]
    pub fn with_wait_generator(mut self, generator: Arc<dyn WaitGenerator>) -> Self {
        self.generator = generator;
        self
    }

    #[must_use]
    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    #[must_use]
    pub fn max_time(&self) -> Duration {
        self.max_time
    }

    /// Whether `status` is retried under this policy.
    #[must_use]
    pub fn is_retriable_status(&self, status: StatusCode) -> bool {
        self.retry_status_codes.contains(&status.as_u16())
            || DEFAULT_RETRIABLE_STATUSES.contains(&status)
    }

    /// Decide what follows attempt number `attempt` (1-based), `elapsed`
    /// after the first attempt started.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, elapsed: Duration, outcome: Outcome) -> Decision {
        if attempt >= self.max_tries || elapsed >= self.max_time {
            return Decision::Stop;
        }

        let retry = match outcome {
            Outcome::TransportFailure | Outcome::IncompleteResult => true,
            Outcome::HttpResponse(status) => self.is_retriable_status(status),
        };
        if !retry {
            return Decision::Stop;
        }

        let remaining = self.max_time.saturating_sub(elapsed);
        Decision::RetryAfter(self.generator.wait(attempt).min(remaining))
    }
}
