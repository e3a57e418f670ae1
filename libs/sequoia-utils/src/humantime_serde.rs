//! Serde helpers reading durations as humantime strings (`"120s"`, `"1m 30s"`).
//!
//! ```
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Backoff {
//!     #[serde(with = "sequoia_utils::humantime_serde")]
//!     max_time: Duration,
//! }
//! ```

use serde::{Deserialize, Deserializer, Serializer, de};
use std::time::Duration;

/// # Errors
/// Fails if the value is not a string humantime can parse.
pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(d)?;
    humantime::parse_duration(&raw)
        .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(&raw), &"a duration"))
}

/// # Errors
/// Propagates the serializer's error.
pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&humantime::format_duration(*d).to_string())
}

/// Same as the parent module, for `Option<Duration>` fields.
pub mod option {
    use super::{Deserialize, Deserializer, Duration, Serializer, de};

    /// # Errors
    /// Fails if a present value is not a humantime string.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<String>::deserialize(d)? {
            None => Ok(None),
            Some(raw) => humantime::parse_duration(&raw).map(Some).map_err(|_| {
                de::Error::invalid_value(de::Unexpected::Str(&raw), &"a duration")
            }),
        }
    }

    /// # Errors
    /// Propagates the serializer's error.
    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => super::serialize(d, s),
            None => s.serialize_none(),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Deserialize, Serialize)]
    struct Limits {
        #[serde(with = "super")]
        max_time: Duration,
        #[serde(default, with = "super::option")]
        interval: Option<Duration>,
    }

    #[test]
    fn parses_humantime_strings() {
        let limits: Limits =
            serde_json::from_str(r#"{"max_time": "2m", "interval": "250ms"}"#).unwrap();
        assert_eq!(limits.max_time, Duration::from_secs(120));
        assert_eq!(limits.interval, Some(Duration::from_millis(250)));
    }

    #[test]
    fn missing_option_is_none() {
        let limits: Limits = serde_json::from_str(r#"{"max_time": "5s"}"#).unwrap();
        assert_eq!(limits.interval, None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_str::<Limits>(r#"{"max_time": "soon"}"#).is_err());
    }

    #[test]
    fn serializes_back_to_text() {
        let limits = Limits {
            max_time: Duration::from_secs(90),
            interval: None,
        };
        let json = serde_json::to_value(&limits).unwrap();
        assert_eq!(json["max_time"], "1m 30s");
    }
}
