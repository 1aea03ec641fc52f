use crate::db::Value;
use crate::error::{MigrateError, Result};
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

static REPLACE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^REPLACE\(\s*field\s*,\s*'([^']*)'\s*,\s*'([^']*)'\s*\)$")
        .expect("static REPLACE pattern must compile")
});

/// Per-column value transform applied while copying rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Transform {
    Upper,
    Lower,
    /// Replace the value with the copy's start time.
    Now,
    /// `REPLACE(field, 'from', 'to')`
    Replace { from: String, to: String },
}

impl FromStr for Transform {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.to_ascii_uppercase().as_str() {
            "UPPER" => return Ok(Transform::Upper),
            "LOWER" => return Ok(Transform::Lower),
            "NOW()" | "NOW" => return Ok(Transform::Now),
            _ => {}
        }
        if let Some(caps) = REPLACE_RE.captures(s) {
            if caps[1].is_empty() {
                return Err(MigrateError::validation(format!(
                    "transform '{}': search text must not be empty",
                    s
                )));
            }
            return Ok(Transform::Replace {
                from: caps[1].to_string(),
                to: caps[2].to_string(),
            });
        }
        Err(MigrateError::validation(format!(
            "unsupported transform '{}', expected UPPER, LOWER, NOW() or REPLACE(field, 'old', 'new')",
            s
        )))
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Upper => f.write_str("UPPER"),
            Transform::Lower => f.write_str("LOWER"),
            Transform::Now => f.write_str("NOW()"),
            Transform::Replace { from, to } => write!(f, "REPLACE(field, '{}', '{}')", from, to),
        }
    }
}

impl Transform {
    /// Text transforms leave non-text values untouched.
    pub fn apply(&self, value: Value, now: NaiveDateTime) -> Value {
        match (self, value) {
            (Transform::Now, _) => Value::Timestamp(now),
            (Transform::Upper, Value::Text(s)) => Value::Text(s.to_uppercase()),
            (Transform::Lower, Value::Text(s)) => Value::Text(s.to_lowercase()),
            (Transform::Replace { from, to }, Value::Text(s)) => Value::Text(s.replace(from, to)),
            (_, other) => other,
        }
    }
}
