//! # Validation
//!
//! Closed-set and format validation of resource spec values.
//!
//! Every failure here is permanent: retrying cannot fix a bad spec, only an
//! edit to the resource can.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid {field} {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("invalid duration {value:?} for {field}: {reason}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("{field} is required when {condition}")]
    Missing {
        field: &'static str,
        condition: &'static str,
    },
}

impl ValidationError {
    #[must_use]
    pub fn invalid_value(field: &'static str, value: &str) -> Self {
        ValidationError::InvalidValue {
            field,
            value: value.to_string(),
        }
    }
}

/// One `<number><unit>` component of a duration
static DURATION_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\d+)(?P<unit>ns|us|µs|ms|s|m|h|d)")
        .expect("Failed to compile duration regex - this should never happen")
});

/// Whole-string shape of a duration, e.g. `1h30m` or `500ms`
static DURATION_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(ns|us|µs|ms|s|m|h|d))+$")
        .expect("Failed to compile duration regex - this should never happen")
});

/// Parse a duration such as `30s`, `24h`, `1h30m` or `500ms`
///
/// Units: `ns`, `us`, `ms`, `s`, `m`, `h`, `d`. The total must be positive.
pub fn parse_duration(field: &'static str, value: &str) -> Result<Duration, ValidationError> {
    let trimmed = value.trim();
    let error = |reason: &str| ValidationError::InvalidDuration {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(error("duration cannot be empty"));
    }
    if !DURATION_FORMAT.is_match(trimmed) {
        return Err(error("expected <number><unit>, e.g. '30s', '1h30m' or '500ms'"));
    }

    let mut total = Duration::ZERO;
    for captures in DURATION_COMPONENT.captures_iter(trimmed) {
        let number: u64 = captures["number"]
            .parse()
            .map_err(|e: std::num::ParseIntError| error(&e.to_string()))?;
        let component = match &captures["unit"] {
            "ns" => Duration::from_nanos(number),
            "us" | "µs" => Duration::from_micros(number),
            "ms" => Duration::from_millis(number),
            "s" => Duration::from_secs(number),
            "m" => Duration::from_secs(number.saturating_mul(60)),
            "h" => Duration::from_secs(number.saturating_mul(3600)),
            "d" => Duration::from_secs(number.saturating_mul(86_400)),
            unit => return Err(error(&format!("unknown unit '{unit}'"))),
        };
        total = total.saturating_add(component);
    }

    if total.is_zero() {
        return Err(error("duration must be greater than 0"));
    }
    Ok(total)
}

/// Parse an optional duration into nanoseconds, `0` when unset
pub fn parse_optional_duration_nanos(
    field: &'static str,
    value: Option<&str>,
) -> Result<u64, ValidationError> {
    match value {
        None => Ok(0),
        Some(v) => {
            let duration = parse_duration(field, v)?;
            match u64::try_from(duration.as_nanos()) {
                Ok(nanos) => Ok(nanos),
                Err(_) => Err(ValidationError::OutOfRange {
                    field,
                    value: v.to_string(),
                    expected: "shorter than 584 years",
                }),
            }
        }
    }
}

/// Parse a sampling frequency: `"0"` to `"100"`, optionally suffixed with `%`
pub fn parse_sample_freq(value: &str) -> Result<u8, ValidationError> {
    let number = value.trim().strip_suffix('%').unwrap_or(value.trim());
    let Ok(freq) = number.parse::<u8>() else {
        return Err(ValidationError::invalid_value("sampleFreq", value));
    };
    if freq > 100 {
        return Err(ValidationError::OutOfRange {
            field: "sampleFreq",
            value: value.to_string(),
            expected: "between 0 and 100",
        });
    }
    Ok(freq)
}

pub fn validate_replicas(replicas: i64) -> Result<i64, ValidationError> {
    if (1..=5).contains(&replicas) {
        Ok(replicas)
    } else {
        Err(ValidationError::OutOfRange {
            field: "replicas",
            value: replicas.to_string(),
            expected: "between 1 and 5",
        })
    }
}

/// Validate an RFC3339 timestamp, returning it in UTC with `Z` and no
/// trailing zero fraction
pub fn validate_rfc3339(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let Ok(parsed) = DateTime::parse_from_rfc3339(value) else {
        return Err(ValidationError::invalid_value(field, value));
    };
    Ok(parsed
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Stream and consumer names may not contain whitespace, `.`, `*`, `>`, `/` or `\`
pub fn validate_broker_name(field: &'static str, name: &str) -> Result<String, ValidationError> {
    let invalid = name.is_empty()
        || name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>' | '/' | '\\'));
    if invalid {
        return Err(ValidationError::invalid_value(field, name));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_durations() {
        assert_eq!(parse_duration("maxAge", "30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("maxAge", "24h").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("maxAge", "1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_duration("maxAge", "500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_compound_durations() {
        assert_eq!(
            parse_duration("maxAge", "1h30m").unwrap(),
            Duration::from_secs(5400)
        );
        assert_eq!(
            parse_duration("ackWait", "1m30s500ms").unwrap(),
            Duration::from_millis(90_500)
        );
    }

    #[test]
    fn test_parse_invalid_durations() {
        for value in ["", "  ", "abc", "10", "10x", "1.5h", "-5s", "0s", "h1"] {
            assert!(
                parse_duration("maxAge", value).is_err(),
                "expected {value:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_optional_duration_nanos() {
        assert_eq!(parse_optional_duration_nanos("maxAge", None).unwrap(), 0);
        assert_eq!(
            parse_optional_duration_nanos("maxAge", Some("2s")).unwrap(),
            2_000_000_000
        );
    }

    #[test]
    fn test_sample_freq() {
        assert_eq!(parse_sample_freq("0").unwrap(), 0);
        assert_eq!(parse_sample_freq("100").unwrap(), 100);
        assert_eq!(parse_sample_freq("50%").unwrap(), 50);
        assert!(parse_sample_freq("101").is_err());
        assert!(parse_sample_freq("fifty").is_err());
    }

    #[test]
    fn test_replicas_and_names() {
        assert!(validate_replicas(1).is_ok());
        assert!(validate_replicas(5).is_ok());
        assert!(validate_replicas(0).is_err());
        assert!(validate_replicas(6).is_err());

        assert!(validate_broker_name("name", "ORDERS").is_ok());
        assert!(validate_broker_name("name", "orders.new").is_err());
        assert!(validate_broker_name("name", "with space").is_err());
        assert!(validate_broker_name("name", "").is_err());
    }

    #[test]
    fn test_rfc3339() {
        assert_eq!(
            validate_rfc3339("optStartTime", "2024-01-01T00:00:00Z").unwrap(),
            "2024-01-01T00:00:00Z"
        );
        assert_eq!(
            validate_rfc3339("optStartTime", "2024-01-01T00:00:00.000Z").unwrap(),
            "2024-01-01T00:00:00Z"
        );
        assert_eq!(
            validate_rfc3339("optStartTime", "2024-01-01T02:00:00.250+02:00").unwrap(),
            "2024-01-01T00:00:00.250Z"
        );
        assert!(validate_rfc3339("optStartTime", "yesterday").is_err());
    }
}
