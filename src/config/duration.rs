use crate::error::{MigrateError, Result};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Parse a duration string like `"30s"`, `"30m"`, `"1h30m"` or `"500ms"`.
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Ok(seconds) = s.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let mut total = Duration::ZERO;
    let mut num_str = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            num_str.push(ch);
        } else if ch.is_alphabetic() {
            let is_ms = ch == 'm' && chars.peek() == Some(&'s');

            let num: u64 = num_str.parse().map_err(|_| {
                MigrateError::validation(format!("invalid duration '{}': missing number", s))
            })?;

            let unit_duration = if is_ms {
                chars.next();
                Duration::from_millis(num)
            } else {
                match ch {
                    's' => Duration::from_secs(num),
                    'm' => Duration::from_secs(num * 60),
                    'h' => Duration::from_secs(num * 3600),
                    _ => {
                        return Err(MigrateError::validation(format!(
                            "invalid duration '{}': unknown unit '{}'",
                            s, ch
                        )));
                    }
                }
            };

            total += unit_duration;
            num_str.clear();
        } else if !ch.is_whitespace() {
            return Err(MigrateError::validation(format!(
                "invalid duration '{}': unexpected '{}'",
                s, ch
            )));
        }
    }

    if !num_str.is_empty() {
        return Err(MigrateError::validation(format!(
            "invalid duration '{}': {} has no unit",
            s, num_str
        )));
    }
    if total.is_zero() {
        return Err(MigrateError::validation(format!(
            "invalid duration '{}': must be greater than zero",
            s
        )));
    }

    Ok(total)
}

/// Serde adapter accepting either a duration string or whole seconds.
pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
