// crates/core/src/config.rs
//! Client configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::credential::REFRESH_MARGIN;

pub const DEFAULT_API_URL: &str = "http://localhost:3001/api";
pub const DEFAULT_PUSH_URL: &str = "ws://localhost:3001/ws";

/// Reconnection policy of the push transport.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Reconnect attempts after a failed or dropped connection.
    pub max_reconnect_attempts: u32,
    /// Backoff before attempt `n` is `reconnect_base_delay * n`.
    pub reconnect_base_delay: Duration,
    /// A connect that takes longer counts as a failed attempt.
    pub connect_timeout: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl PushConfig {
    /// Backoff before the given 1-based reconnect attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.reconnect_base_delay * attempt
    }
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    /// Give up polling after this long. `None` polls until terminal or stop.
    pub deadline: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            deadline: Some(Duration::from_secs(5 * 60)),
        }
    }
}

/// Top-level configuration for the Explainer client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, without trailing slash (e.g. http://host/api).
    pub api_base_url: String,
    /// WebSocket endpoint of the push channel.
    pub push_url: String,
    /// Where the session credential is persisted. `None` keeps it in memory.
    pub store_path: Option<PathBuf>,
    pub request_timeout: Duration,
    pub refresh_margin: Duration,
    pub push: PushConfig,
    pub poll: PollConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.into(),
            push_url: DEFAULT_PUSH_URL.into(),
            store_path: default_store_path(),
            request_timeout: Duration::from_secs(30),
            refresh_margin: REFRESH_MARGIN,
            push: PushConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `EXPLAINER_API_URL`, `EXPLAINER_PUSH_URL` and
    /// `EXPLAINER_STORE_PATH`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("EXPLAINER_API_URL") {
            config.api_base_url = url;
        }
        if let Ok(url) = std::env::var("EXPLAINER_PUSH_URL") {
            config.push_url = url;
        }
        if let Ok(path) = std::env::var("EXPLAINER_STORE_PATH") {
            config.store_path = Some(PathBuf::from(path));
        }
        config.api_base_url = config.api_base_url.trim_end_matches('/').to_string();
        config
    }

    /// Absolute URL of an API path such as `/auth/login`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }
}

/// `<data dir>/explainer/session.json`, when the platform has a data dir.
pub fn default_store_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("explainer").join("session.json"))
}
