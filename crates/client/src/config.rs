// Client configuration file.
//
// Default location: `~/.chatfeed/config.toml`. Every field is optional; a
// missing file means all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::feed::{FeedSettings, DEFAULT_MAX_MESSAGES};
use crate::render::obfuscate::DEFAULT_OBFUSCATION_TICK_MS;
use crate::stream::backoff::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS,
};
use crate::stream::dedup::DEFAULT_DEDUP_CAPACITY;
use crate::stream::heartbeat::{DEFAULT_HEARTBEAT_TIMEOUT_MS, DEFAULT_WATCHDOG_INTERVAL_MS};
use crate::stream::StreamPolicy;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

/// Root directory for client state: `~/.chatfeed/`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".chatfeed"))
}

/// Path to the config file: `~/.chatfeed/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Relay base URL; `/stream` and `/clear-messages` hang off it.
    pub server_url: String,
    pub stream: StreamSettings,
    pub render: RenderSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            stream: StreamSettings::default(),
            render: RenderSettings::default(),
        }
    }
}

/// Reconnect, watchdog and dedup tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamSettings {
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub watchdog_interval_ms: u64,
    pub dedup_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: DEFAULT_INITIAL_BACKOFF_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            watchdog_interval_ms: DEFAULT_WATCHDOG_INTERVAL_MS,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

impl From<&StreamSettings> for StreamPolicy {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            backoff_multiplier: settings.backoff_multiplier,
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            heartbeat_timeout: Duration::from_millis(settings.heartbeat_timeout_ms),
            // A zero interval would spin the runtime loop.
            watchdog_interval: Duration::from_millis(settings.watchdog_interval_ms.max(1)),
            dedup_capacity: settings.dedup_capacity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderSettings {
    pub obfuscation_tick_ms: u64,
    pub max_messages: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self { obfuscation_tick_ms: DEFAULT_OBFUSCATION_TICK_MS, max_messages: DEFAULT_MAX_MESSAGES }
    }
}

impl ClientConfig {
    /// Load from an explicit path, or from the default location if it
    /// exists. An explicit path must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.server_url()?;
        Ok(config)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Parsed server URL; only http and https are accepted.
    pub fn server_url(&self) -> Result<Url, ConfigError> {
        parse_server_url(&self.server_url)
    }

    pub fn feed_settings(&self) -> FeedSettings {
        FeedSettings {
            policy: StreamPolicy::from(&self.stream),
            obfuscation_tick: Duration::from_millis(self.render.obfuscation_tick_ms.max(1)),
            max_messages: self.render.max_messages,
        }
    }
}

pub fn parse_server_url(value: &str) -> Result<Url, ConfigError> {
    let parsed = Url::parse(value)
        .map_err(|error| ConfigError::InvalidUrl { url: value.to_string(), reason: error.to_string() })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ConfigError::InvalidUrl {
            url: value.to_string(),
            reason: format!("unsupported scheme `{other}`, expected http or https"),
        }),
    }
}

/// Resolve an endpoint path beneath the server URL, keeping any path prefix
/// (`https://host/chat` + `/stream` is `https://host/chat/stream`).
pub fn endpoint_url(server: &Url, path: &str) -> Result<Url, url::ParseError> {
    let mut base = server.clone();
    if !base.path().ends_with('/') {
        let prefixed = format!("{}/", base.path());
        base.set_path(&prefixed);
    }
    base.join(path.trim_start_matches('/'))
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid server_url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, "http://127.0.0.1:5000");
        assert_eq!(config.stream.initial_backoff_ms, 2_000);
        assert_eq!(config.stream.backoff_multiplier, 1.5);
        assert_eq!(config.stream.max_backoff_ms, 15_000);
        assert_eq!(config.stream.heartbeat_timeout_ms, 20_000);
        assert_eq!(config.stream.watchdog_interval_ms, 5_000);
        assert_eq!(config.stream.dedup_capacity, 4_000);
        assert_eq!(config.render.obfuscation_tick_ms, 50);
    }

    #[test]
    fn save_and_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let mut config = ClientConfig::default();
        config.server_url = "https://chat.example.com".to_string();
        config.stream.max_backoff_ms = 30_000;
        config.save_to(&path).unwrap();

        assert_eq!(ClientConfig::load(Some(&path)).unwrap(), config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[stream]\nheartbeat_timeout_ms = 9000\n").unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(config.stream.heartbeat_timeout_ms, 9_000);
        assert_eq!(config.stream.initial_backoff_ms, 2_000);
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = ClientConfig::load(Some(&tmp.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "server_url = [").unwrap();
        assert!(matches!(ClientConfig::load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn endpoints_keep_the_server_path_prefix() {
        let origin = parse_server_url("http://127.0.0.1:5000").unwrap();
        assert_eq!(endpoint_url(&origin, "/stream").unwrap().as_str(), "http://127.0.0.1:5000/stream");

        let prefixed = parse_server_url("https://host/chat").unwrap();
        assert_eq!(endpoint_url(&prefixed, "/stream").unwrap().as_str(), "https://host/chat/stream");

        let trailing = parse_server_url("https://host/chat/").unwrap();
        assert_eq!(endpoint_url(&trailing, "/clear-messages").unwrap().as_str(), "https://host/chat/clear-messages");
    }

    #[test]
    fn non_http_server_url_is_rejected() {
        let err = parse_server_url("ftp://example.com").unwrap_err();
        assert!(err.to_string().contains("unsupported scheme `ftp`"));
        assert!(parse_server_url("not a url").is_err());
        assert!(parse_server_url("https://example.com").is_ok());
    }

    #[test]
    fn feed_settings_convert_milliseconds() {
        let mut config = ClientConfig::default();
        config.stream.watchdog_interval_ms = 0;
        let settings = config.feed_settings();
        assert_eq!(settings.policy.initial_backoff, Duration::from_millis(2_000));
        assert_eq!(settings.policy.watchdog_interval, Duration::from_millis(1));
        assert_eq!(settings.obfuscation_tick, Duration::from_millis(50));
    }
}
