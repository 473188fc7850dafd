// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local use.

use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MAX_MESSAGES: usize = 2000;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;
pub const DEFAULT_RETRY_MS: u64 = 3000;

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Messages retained for replay; the oldest are dropped first.
    pub max_messages: usize,
    /// Idle time on a stream before a heartbeat event is sent.
    pub heartbeat_interval: Duration,
    /// Reconnect delay advertised to clients in the `retry:` field.
    pub retry: Duration,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_env_fn(|_| Err(std::env::VarError::NotPresent))
    }
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `CHATFEED_RELAY_HOST` | `0.0.0.0` |
    /// | `CHATFEED_RELAY_PORT` | `5000` |
    /// | `CHATFEED_RELAY_MAX_MESSAGES` | `2000` |
    /// | `CHATFEED_RELAY_HEARTBEAT_SECS` | `15` |
    /// | `CHATFEED_RELAY_RETRY_MS` | `3000` |
    /// | `CHATFEED_RELAY_CORS_ORIGINS` | *(none; cors.rs uses dev defaults)* |
    /// | `CHATFEED_RELAY_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("CHATFEED_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parsed(&env, "CHATFEED_RELAY_PORT").unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let max_messages = parsed(&env, "CHATFEED_RELAY_MAX_MESSAGES")
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_MAX_MESSAGES);
        let heartbeat_secs = parsed(&env, "CHATFEED_RELAY_HEARTBEAT_SECS")
            .filter(|n: &u64| *n > 0)
            .unwrap_or(DEFAULT_HEARTBEAT_SECS);
        let retry_ms = parsed(&env, "CHATFEED_RELAY_RETRY_MS").unwrap_or(DEFAULT_RETRY_MS);

        let cors_origins = env("CHATFEED_RELAY_CORS_ORIGINS").ok();
        let log_filter = env("CHATFEED_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self {
            listen_addr,
            max_messages,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            retry: Duration::from_millis(retry_ms),
            cors_origins,
            log_filter,
        }
    }
}

fn parsed<F, T>(env: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
    T: std::str::FromStr,
{
    env(key).ok().and_then(|v| v.trim().parse().ok())
}
