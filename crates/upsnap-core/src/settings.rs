//! Settings resolution.
//!
//! Each setting is taken from, in order of precedence:
//!
//! 1. the environment (`UPSNAP_INTERVAL`, `UPSNAP_NOTIFICATIONS`)
//! 2. the stored settings record
//! 3. the built-in default (`@every 3s`, notifications on)
//!
//! An environment variable set to the empty string counts as unset.

use std::time::Duration;

use tracing::debug;

use upsnap_types::{DEFAULT_INTERVAL, DEFAULT_NOTIFICATIONS, Settings};

use crate::error::{Error, Result};
use crate::interval::parse_interval;

/// Environment variable overriding the poll interval.
pub const ENV_INTERVAL: &str = "UPSNAP_INTERVAL";

/// Environment variable overriding the notifications flag.
pub const ENV_NOTIFICATIONS: &str = "UPSNAP_NOTIFICATIONS";

/// Pick the first present value: environment, then stored, then default.
pub fn resolve<T>(env: Option<T>, stored: Option<T>, default: T) -> T {
    env.or(stored).unwrap_or(default)
}

/// Parse a boolean the way Go's `strconv.ParseBool` does.
///
/// Accepts `1 t T TRUE true True` and `0 f F FALSE false False`.
pub fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        other => Err(Error::config(format!("invalid boolean '{other}'"))),
    }
}

/// Raw environment overrides, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// Value of `UPSNAP_INTERVAL`.
    pub interval: Option<String>,
    /// Value of `UPSNAP_NOTIFICATIONS`.
    pub notifications: Option<String>,
}

impl EnvOverrides {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            interval: non_empty(ENV_INTERVAL),
            notifications: non_empty(ENV_NOTIFICATIONS),
        }
    }
}

/// Effective settings plus the parsed interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    /// Record to persist back to the store.
    pub settings: Settings,
    /// Parsed poll interval.
    pub interval: Duration,
}

/// Resolve the effective settings.
///
/// # Errors
///
/// Returns [`Error::Config`] if `UPSNAP_NOTIFICATIONS` is not a valid
/// boolean or the winning interval expression does not parse.
pub fn resolve_settings(
    env: &EnvOverrides,
    stored: Option<&Settings>,
) -> Result<ResolvedSettings> {
    let env_notifications = match env.notifications.as_deref() {
        Some(raw) => Some(parse_bool(raw).map_err(|_| {
            Error::config(format!("{ENV_NOTIFICATIONS} must be a boolean, got '{raw}'"))
        })?),
        None => None,
    };

    let stored_interval = stored
        .map(|s| s.interval.clone())
        .filter(|i| !i.trim().is_empty());

    let interval = resolve(
        env.interval.clone(),
        stored_interval,
        DEFAULT_INTERVAL.to_string(),
    );
    let notifications = resolve(
        env_notifications,
        stored.map(|s| s.notifications),
        DEFAULT_NOTIFICATIONS,
    );

    let parsed = parse_interval(&interval)?;
    debug!("Ping interval set to {} ({:?})", interval, parsed);
    debug!("Notifications set to {}", notifications);

    Ok(ResolvedSettings {
        settings: Settings {
            interval,
            notifications,
        },
        interval: parsed,
    })
}
