//! Use with `#[serde(deserialize_with = "yosun_util::duration::deserialize")]`
//! on [`Duration`] fields, or with
//! `#[serde(deserialize_with = "yosun_util::duration::deserialize_option")]` on
//! `Option<Duration>` fields.
//!
//! Accepted inputs are [humantime](humantime::parse_duration) strings (`"10s"`,
//! `"1m 30s"`, `"250ms"`) and non-negative numbers, which are read as seconds.

use humantime::parse_duration;
use serde::de::{Error, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt::Formatter;
use std::time::Duration;

/// Deserializes a [`Duration`] from a human-readable string or a number of
/// seconds.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor)
}

/// Deserializes an optional [`Duration`]. An explicit `null` yields [`None`].
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "deserialize")] Duration);

    let wrapped = Option::<Wrapped>::deserialize(deserializer)?;

    Ok(wrapped.map(|Wrapped(duration)| duration))
}

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a duration such as \"10s\" or a number of seconds")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: Error,
    {
        let trimmed = value.trim();

        // Environment sources deliver bare numbers as strings
        if let Ok(seconds) = trimmed.parse::<u64>() {
            return Ok(Duration::from_secs(seconds));
        }

        parse_duration(trimmed).map_err(Error::custom)
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Ok(Duration::from_secs(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        u64::try_from(value)
            .map(Duration::from_secs)
            .map_err(|_| Error::custom(format!("duration cannot be negative: {}", value)))
    }

    fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Duration::try_from_secs_f64(value).map_err(Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use std::time::Duration;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Holder {
        #[serde(deserialize_with = "super::deserialize")]
        required: Duration,
        #[serde(default, deserialize_with = "super::deserialize_option")]
        optional: Option<Duration>,
    }

    #[test]
    fn from_humantime_strings() {
        // Given
        let input = r#"
required: 1m 30s
optional: 250ms
"#;
        let expected_output = Holder {
            required: Duration::from_secs(90),
            optional: Some(Duration::from_millis(250)),
        };

        // When
        let actual_output = serde_yml::from_str::<Holder>(input).unwrap();

        // Then
        assert_eq!(expected_output, actual_output);
    }

    #[test]
    fn from_numbers() {
        // Given
        let input = r#"
required: 10
optional: 1.5
"#;
        let expected_output = Holder {
            required: Duration::from_secs(10),
            optional: Some(Duration::from_millis(1500)),
        };

        // When
        let actual_output = serde_yml::from_str::<Holder>(input).unwrap();

        // Then
        assert_eq!(expected_output, actual_output);
    }

    #[test]
    fn from_numeric_string_and_null() {
        // Given
        let input = r#"
required: "7"
optional: ~
"#;
        let expected_output = Holder {
            required: Duration::from_secs(7),
            optional: None,
        };

        // When
        let actual_output = serde_yml::from_str::<Holder>(input).unwrap();

        // Then
        assert_eq!(expected_output, actual_output);
    }

    #[test]
    fn rejects_garbage() {
        // Given
        let input = "required: soon";

        // When
        let result = serde_yml::from_str::<Holder>(input);

        // Then
        assert!(result.is_err());
    }

    #[test]
    fn rejects_negative() {
        // Given
        let input = "required: -3";

        // When
        let result = serde_yml::from_str::<Holder>(input);

        // Then
        assert!(result.is_err());
    }
}
