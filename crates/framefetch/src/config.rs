//! Controller settings, with environment overrides.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{var}={value:?} is not a valid {expected}")]
pub struct ConfigError {
    pub var: String,
    pub value: String,
    pub expected: &'static str,
}

/// Tunables for one [`Controller`](crate::Controller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Readiness events handled per tick. Anything beyond this waits for the
    /// next tick, which keeps a single tick bounded.
    pub event_capacity: usize,
    /// Wall-clock budget for the shutdown drain. `None` waits for the engine
    /// however long it takes.
    pub drain_timeout: Option<Duration>,
    /// Poll budget for the shutdown drain.
    pub drain_max_polls: Option<u64>,
    /// Sleep between drain passes that made no progress.
    pub drain_poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            event_capacity: 256,
            drain_timeout: Some(Duration::from_secs(30)),
            drain_max_polls: None,
            drain_poll_interval: Duration::from_millis(1),
        }
    }
}

impl ControllerConfig {
    /// Defaults overridden by `FRAMEFETCH_EVENT_CAPACITY`,
    /// `FRAMEFETCH_DRAIN_TIMEOUT_MS` (0 = unbounded), `FRAMEFETCH_DRAIN_MAX_POLLS`
    /// (0 = unbounded) and `FRAMEFETCH_DRAIN_POLL_INTERVAL_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(capacity) = parse_var::<usize>(&lookup, "FRAMEFETCH_EVENT_CAPACITY", "event count")? {
            if capacity == 0 {
                return Err(ConfigError {
                    var: "FRAMEFETCH_EVENT_CAPACITY".into(),
                    value: "0".into(),
                    expected: "non-zero event count",
                });
            }
            config.event_capacity = capacity;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "FRAMEFETCH_DRAIN_TIMEOUT_MS", "millisecond count")? {
            config.drain_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(polls) = parse_var::<u64>(&lookup, "FRAMEFETCH_DRAIN_MAX_POLLS", "poll count")? {
            config.drain_max_polls = (polls > 0).then_some(polls);
        }
        if let Some(ms) =
            parse_var::<u64>(&lookup, "FRAMEFETCH_DRAIN_POLL_INTERVAL_MS", "millisecond count")?
        {
            config.drain_poll_interval = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

/// Read and parse one variable. Unset or blank means "keep the default".
pub fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => {
            value.trim().parse().map(Some).map_err(|_| ConfigError {
                var: var.to_string(),
                value,
                expected,
            })
        }
        _ => Ok(None),
    }
}
