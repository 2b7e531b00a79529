//! Poll interval expressions.
//!
//! Accepted forms:
//!
//! | Expression | Meaning |
//! |------------|---------|
//! | `@every 3s` | every 3 seconds (stored default) |
//! | `@every 1m 30s` | every 90 seconds |
//! | `10s`, `500ms`, `2m` | bare duration, same as `@every` |
//!
//! Durations use the `humantime` grammar. Cron field expressions such as
//! `*/5 * * * *` are rejected.

use std::time::Duration;

use crate::error::{Error, Result};

const EVERY_PREFIX: &str = "@every";

/// Parse an interval expression into the time between poll ticks.
///
/// # Errors
///
/// Returns [`Error::Config`] for empty, zero, cron-style or otherwise
/// unparseable expressions.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use upsnap_core::parse_interval;
///
/// assert_eq!(parse_interval("@every 3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_interval("1m 30s").unwrap(), Duration::from_secs(90));
/// assert!(parse_interval("*/5 * * * *").is_err());
/// ```
pub fn parse_interval(expr: &str) -> Result<Duration> {
    let trimmed = expr.trim();
    let body = match trimmed.strip_prefix(EVERY_PREFIX) {
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest.trim(),
        Some(_) => return Err(invalid(expr, "expected '@every <duration>'")),
        None if trimmed.starts_with('@') => {
            return Err(invalid(expr, "only the '@every' descriptor is supported"));
        }
        None => trimmed,
    };

    if body.is_empty() {
        return Err(invalid(expr, "missing duration"));
    }
    if looks_like_cron(body) {
        return Err(invalid(expr, "cron expressions are not supported"));
    }

    let duration = humantime::parse_duration(body).map_err(|e| invalid(expr, &e.to_string()))?;
    if duration.is_zero() {
        return Err(invalid(expr, "interval must be greater than zero"));
    }
    Ok(duration)
}

fn looks_like_cron(body: &str) -> bool {
    let fields: Vec<&str> = body.split_whitespace().collect();
    body.contains('*')
        || (fields.len() >= 5
            && fields
                .iter()
                .all(|f| f.chars().all(|c| c.is_ascii_digit() || ",-/".contains(c))))
}

fn invalid(expr: &str, reason: &str) -> Error {
    Error::config(format!("invalid interval '{expr}': {reason}"))
}
