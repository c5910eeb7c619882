use std::time::Duration;

use framefetch::config::{parse_var, ConfigError};

/// Engine-wide defaults. Per-request settings win over these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurlConfig {
    pub user_agent: String,
    /// Applied when a request sets no timeout of its own. `None` = no limit.
    pub default_timeout: Option<Duration>,
    pub default_connect_timeout: Duration,
    /// Cap on simultaneously open connections. 0 = unlimited.
    pub max_connections: usize,
    pub max_host_connections: usize,
    /// Let libcurl negotiate and decode gzip/deflate/br.
    pub accept_encoding: bool,
}

impl Default for CurlConfig {
    fn default() -> Self {
        CurlConfig {
            user_agent: format!("framefetch/{}", env!("CARGO_PKG_VERSION")),
            default_timeout: Some(Duration::from_secs(60)),
            default_connect_timeout: Duration::from_secs(10),
            max_connections: 0,
            max_host_connections: 0,
            accept_encoding: true,
        }
    }
}

impl CurlConfig {
    /// Defaults overridden by `FRAMEFETCH_USER_AGENT`, `FRAMEFETCH_TIMEOUT_MS`
    /// (0 = no limit), `FRAMEFETCH_CONNECT_TIMEOUT_MS`,
    /// `FRAMEFETCH_MAX_CONNECTIONS` and `FRAMEFETCH_MAX_HOST_CONNECTIONS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(agent) = lookup("FRAMEFETCH_USER_AGENT").filter(|v| !v.trim().is_empty()) {
            config.user_agent = agent;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "FRAMEFETCH_TIMEOUT_MS", "millisecond count")? {
            config.default_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "FRAMEFETCH_CONNECT_TIMEOUT_MS", "millisecond count")? {
            config.default_connect_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<usize>(&lookup, "FRAMEFETCH_MAX_CONNECTIONS", "connection count")? {
            config.max_connections = n;
        }
        if let Some(n) = parse_var::<usize>(&lookup, "FRAMEFETCH_MAX_HOST_CONNECTIONS", "connection count")? {
            config.max_host_connections = n;
        }

        Ok(config)
    }
}
