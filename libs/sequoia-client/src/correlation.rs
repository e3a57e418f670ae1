use std::fmt;

use http::HeaderValue;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::SdkError;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Identifier shared by every request of one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn header_value(&self) -> Result<HeaderValue, SdkError> {
        HeaderValue::from_str(&self.0)
            .map_err(|e| SdkError::Config(format!("correlation id is not a valid header: {e}")))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlation settings.
///
/// `correlation_id` wins over everything else. Otherwise ids are built as
/// `user_id/application_id/<suffix>`, leaving out whichever prefix segment is
/// unset; the suffix is `transaction_id` when configured, or a fresh UUID per
/// operation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub correlation_id: Option<String>,
    pub user_id: Option<String>,
    pub application_id: Option<String>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone)]
enum Source {
    Fixed(CorrelationId),
    Generated { prefix: String },
}

/// Hands out one [`CorrelationId`] per top-level operation.
#[derive(Debug, Clone)]
pub struct CorrelationContext {
    source: Source,
}

impl CorrelationContext {
    /// # Errors
    ///
    /// Returns [`SdkError::Config`] if a configured value cannot be sent as
    /// an HTTP header.
    pub fn new(config: &CorrelationConfig) -> Result<Self, SdkError> {
        let prefix: String = [
            non_empty(config.user_id.as_deref()),
            non_empty(config.application_id.as_deref()),
        ]
        .into_iter()
        .flatten()
        .map(|segment| format!("{segment}/"))
        .collect();

        let source = if let Some(fixed) = non_empty(config.correlation_id.as_deref()) {
            Source::Fixed(CorrelationId(fixed.to_owned()))
        } else if let Some(transaction) = non_empty(config.transaction_id.as_deref()) {
            Source::Fixed(CorrelationId(format!("{prefix}{transaction}")))
        } else {
            Source::Generated { prefix }
        };

        let context = Self { source };
        context.begin_operation().header_value()?;
        Ok(context)
    }

    /// The id for a new top-level call; every request the call makes reuses it.
    #[must_use]
    pub fn begin_operation(&self) -> CorrelationId {
        match &self.source {
            Source::Fixed(id) => id.clone(),
            Source::Generated { prefix } => CorrelationId(format!("{prefix}{}", Uuid::new_v4())),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
