//! Engine configuration.
//!
//! Loaded from TOML with serde defaults, then overridden from the
//! environment (`OCHE_SERVER_URL`, `OCHE_TOKEN`, `OCHE_PLAYER`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::remote::RetryPolicy;

/// Environment variable overriding the server URL.
pub const ENV_SERVER_URL: &str = "OCHE_SERVER_URL";
/// Environment variable holding the bearer token.
pub const ENV_TOKEN: &str = "OCHE_TOKEN";
/// Environment variable naming the local player.
pub const ENV_PLAYER: &str = "OCHE_PLAYER";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base URL of the session store.
    #[serde(default = "default_server_url")]
    server_url: String,

    /// Bearer token for the store.
    #[serde(default)]
    token: Option<String>,

    /// Player throws are attributed to.
    #[serde(default)]
    player: Option<String>,

    /// Where the resumable marker lives. No marker when unset.
    #[serde(default)]
    marker_path: Option<PathBuf>,

    /// Retry, reconnect and polling settings.
    #[serde(default)]
    sync: SyncConfig,
}

fn default_server_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

/// Retry, reconnect and polling settings for the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Attempts per remote write, including the first.
    #[serde(default = "default_submit_attempts")]
    submit_attempts: u32,

    /// Pause between write attempts.
    #[serde(default = "default_submit_delay_ms")]
    submit_delay_ms: u64,

    /// Push-channel reconnects before giving up.
    #[serde(default = "default_reconnect_attempts")]
    reconnect_attempts: u32,

    /// Pause between reconnects.
    #[serde(default = "default_reconnect_delay_ms")]
    reconnect_delay_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,

    /// Polling fallback interval. Polling is off when unset.
    #[serde(default)]
    poll_interval_ms: Option<u64>,
}

fn default_submit_attempts() -> u32 {
    3
}

fn default_submit_delay_ms() -> u64 {
    500
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            submit_attempts: default_submit_attempts(),
            submit_delay_ms: default_submit_delay_ms(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            poll_interval_ms: None,
        }
    }
}

impl SyncConfig {
    /// Retry policy for remote writes and fetches.
    pub fn submit_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.submit_attempts, Duration::from_millis(self.submit_delay_ms))
    }

    /// Reconnect budget for the push channel.
    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.reconnect_attempts,
            Duration::from_millis(self.reconnect_delay_ms),
        )
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Polling fallback interval, if enabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Sets the write retry budget.
    pub fn with_submit_retry(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.submit_attempts = attempts;
        self.submit_delay_ms = delay_ms;
        self
    }

    /// Sets the reconnect budget.
    pub fn with_reconnect(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.reconnect_attempts = attempts;
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Enables or disables polling.
    pub fn with_poll_interval(mut self, interval_ms: Option<u64>) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            token: None,
            player: None,
            marker_path: None,
            sync: SyncConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a TOML file.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading config from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))?;

        info!(server_url = %config.server_url, "Config loaded successfully");
        Ok(config)
    }

    /// Loads `path` if given, else defaults, then applies the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_env())
    }

    /// Applies environment overrides.
    #[instrument(skip(self))]
    pub fn with_env(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_SERVER_URL) {
            debug!(%url, "Server URL from environment");
            self.server_url = url;
        }
        if let Ok(token) = std::env::var(ENV_TOKEN) {
            self.token = Some(token);
        }
        if let Ok(player) = std::env::var(ENV_PLAYER) {
            self.player = Some(player);
        }
        self
    }

    /// Replaces the server URL.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Replaces the local player.
    pub fn with_player(mut self, player: Option<String>) -> Self {
        self.player = player;
        self
    }

    /// Replaces the marker location.
    pub fn with_marker_path(mut self, path: Option<PathBuf>) -> Self {
        self.marker_path = path;
        self
    }

    /// Replaces the sync settings.
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let sync = SyncConfig::default();
        assert_eq!(sync.submit_policy(), RetryPolicy::new(3, Duration::from_millis(500)));
        assert_eq!(sync.reconnect_policy(), RetryPolicy::new(5, Duration::from_secs(2)));
        assert_eq!(sync.request_timeout(), Duration::from_secs(10));
        assert_eq!(sync.poll_interval(), None);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
server_url = "https://darts.example"
marker_path = "/tmp/oche.json"

[sync]
submit_attempts = 4
poll_interval_ms = 15000
"#
        )
        .expect("write");

        let config = EngineConfig::from_file(file.path()).expect("load");
        assert_eq!(config.server_url(), "https://darts.example");
        assert_eq!(config.marker_path().as_deref(), Some(Path::new("/tmp/oche.json")));
        assert_eq!(*config.sync().submit_attempts(), 4);
        assert_eq!(*config.sync().submit_delay_ms(), 500);
        assert_eq!(config.sync().poll_interval(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_bad_file_reports_location() {
        let err = EngineConfig::from_file("/definitely/not/here.toml").expect_err("missing");
        assert!(err.message.starts_with("Failed to read config file"));
        assert!(err.file.ends_with("config.rs"));
    }
}
