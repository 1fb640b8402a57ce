//! Client configuration resolved from defaults and the environment.

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::completion::CompletionMarkers;

pub const ENV_BASE_URL: &str = "ADVENTURE_BASE_URL";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "ADVENTURE_REQUEST_TIMEOUT_MS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "ADVENTURE_CONNECT_TIMEOUT_MS";
pub const ENV_MAX_RETRIES: &str = "ADVENTURE_MAX_RETRIES";
pub const ENV_RETRY_DELAY_MS: &str = "ADVENTURE_RETRY_DELAY_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "ADVENTURE_POLL_INTERVAL_MS";
pub const ENV_POLL_HARD_STOP_MS: &str = "ADVENTURE_POLL_HARD_STOP_MS";
pub const ENV_MAX_EMPTY_RESPONSES: &str = "ADVENTURE_MAX_EMPTY_RESPONSES";
pub const ENV_PAUSE_ON_EMPTY: &str = "ADVENTURE_PAUSE_ON_EMPTY";

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const CONNECTION_TIMEOUT_MS: u64 = 10_000;
pub const MAX_RETRIES: u32 = 5;
pub const RETRY_DELAY_MS: u64 = 1_000;
pub const POLL_INTERVAL_MS: u64 = 2_000;
pub const POLL_HARD_STOP_MS: u64 = 300_000;
pub const MAX_EMPTY_RESPONSES: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid ADVENTURE_BASE_URL: {0}")]
    InvalidBaseUrl(String),
    #[error("invalid duration setting: {0}")]
    InvalidDuration(String),
    #[error("invalid ADVENTURE_MAX_RETRIES: {0}")]
    InvalidMaxRetries(String),
    #[error("invalid ADVENTURE_MAX_EMPTY_RESPONSES: {0}")]
    InvalidMaxEmptyResponses(String),
    #[error("invalid ADVENTURE_PAUSE_ON_EMPTY: {0}")]
    InvalidPauseOnEmpty(String),
}

/// Streaming channel lifecycle settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long a channel may take to open before the attempt is abandoned.
    pub connect_timeout: Duration,
    /// Reconnect attempts allowed without an intervening successful open.
    pub max_retries: u32,
    /// Fixed delay before every reconnect attempt.
    pub retry_delay: Duration,
    pub completion_markers: CompletionMarkers,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(CONNECTION_TIMEOUT_MS),
            max_retries: MAX_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
            completion_markers: CompletionMarkers::default(),
        }
    }
}

/// Snapshot polling settings.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub interval: Duration,
    /// Wall-clock limit after which polling halts regardless of state.
    pub hard_stop: Duration,
    /// Consecutive empty snapshots before polling pauses.
    pub max_empty_responses: u32,
    /// When false, empty snapshots are counted but never pause the loop.
    pub pause_on_empty: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(POLL_INTERVAL_MS),
            hard_stop: Duration::from_millis(POLL_HARD_STOP_MS),
            max_empty_responses: MAX_EMPTY_RESPONSES,
            pause_on_empty: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server origin; HTTP endpoints and the channel URL derive from it.
    pub base_url: Url,
    pub request_timeout: Duration,
    pub connection: ConnectionConfig,
    pub polling: PollingConfig,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            connection: ConnectionConfig::default(),
            polling: PollingConfig::default(),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let base_url = value(ENV_BASE_URL).unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut config = Self::new(&base_url)?;

        if let Some(raw) = value(ENV_REQUEST_TIMEOUT_MS) {
            config.request_timeout = parse_millis(ENV_REQUEST_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = value(ENV_CONNECT_TIMEOUT_MS) {
            config.connection.connect_timeout = parse_millis(ENV_CONNECT_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = value(ENV_MAX_RETRIES) {
            config.connection.max_retries = raw
                .parse()
                .map_err(|error| ConfigError::InvalidMaxRetries(format!("{raw}: {error}")))?;
        }
        if let Some(raw) = value(ENV_RETRY_DELAY_MS) {
            config.connection.retry_delay = parse_millis(ENV_RETRY_DELAY_MS, &raw)?;
        }
        if let Some(raw) = value(ENV_POLL_INTERVAL_MS) {
            let interval = parse_millis(ENV_POLL_INTERVAL_MS, &raw)?;
            if interval.is_zero() {
                return Err(ConfigError::InvalidDuration(format!(
                    "{ENV_POLL_INTERVAL_MS}: must be at least 1ms"
                )));
            }
            config.polling.interval = interval;
        }
        if let Some(raw) = value(ENV_POLL_HARD_STOP_MS) {
            config.polling.hard_stop = parse_millis(ENV_POLL_HARD_STOP_MS, &raw)?;
        }
        if let Some(raw) = value(ENV_MAX_EMPTY_RESPONSES) {
            let parsed: u32 = raw.parse().map_err(|error| {
                ConfigError::InvalidMaxEmptyResponses(format!("{raw}: {error}"))
            })?;
            if parsed == 0 {
                return Err(ConfigError::InvalidMaxEmptyResponses(
                    "must be at least 1".to_string(),
                ));
            }
            config.polling.max_empty_responses = parsed;
        }
        if let Some(raw) = value(ENV_PAUSE_ON_EMPTY) {
            config.polling.pause_on_empty = parse_bool(&raw)
                .ok_or_else(|| ConfigError::InvalidPauseOnEmpty(raw.clone()))?;
        }

        Ok(config)
    }
}

/// Trim, drop trailing slashes and require an http(s) origin.
pub fn normalize_base_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidBaseUrl("base URL is empty".to_string()));
    }
    let url =
        Url::parse(trimmed).map_err(|error| ConfigError::InvalidBaseUrl(format!("{trimmed}: {error}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidBaseUrl(format!(
            "URL must use http:// or https:// scheme, got: {other}"
        ))),
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    raw.parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|error| ConfigError::InvalidDuration(format!("{key}: {error}")))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
