//! Realtime channel configuration
//!
//! Loaded from `FLEET_*` environment variables through [`AppConfigTrait`],
//! or built in code with the `with_*` helpers.

use super::defaults::ChannelDefaults;
use super::reconnect::ReconnectPolicy;
use crate::types::{ChannelError, ChannelResult};
use fleet_core::{
    get_env_optional, get_env_or_default, get_env_parsed, AppConfigTrait, ConfigError,
    ConfigSource,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Realtime channel specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Base HTTP endpoint of the fleet API; the WebSocket URL is derived from it
    pub api_base_url: String,
    /// Path of the event stream on the API host
    pub ws_path: String,
    /// Interval between `{"type":"ping"}` keep-alive messages
    pub keep_alive_interval_ms: u64,
    /// Delay before a reconnect attempt (initial delay when backing off)
    pub reconnect_delay_ms: u64,
    /// Cap for exponential backoff. Unset means a fixed delay.
    pub max_reconnect_delay_ms: Option<u64>,
    /// Random fraction added to backoff delays
    pub backoff_jitter: f64,
    /// Handshake timeout
    pub connect_timeout_ms: u64,
    /// Maximum inbound message size in bytes
    pub max_message_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            api_base_url: ChannelDefaults::API_BASE_URL.to_string(),
            ws_path: ChannelDefaults::WS_PATH.to_string(),
            keep_alive_interval_ms: ChannelDefaults::KEEP_ALIVE_INTERVAL_MS,
            reconnect_delay_ms: ChannelDefaults::RECONNECT_DELAY_MS,
            max_reconnect_delay_ms: None,
            backoff_jitter: ChannelDefaults::BACKOFF_JITTER,
            connect_timeout_ms: ChannelDefaults::CONNECT_TIMEOUT_MS,
            max_message_size: ChannelDefaults::MAX_MESSAGE_SIZE,
        }
    }
}

impl AppConfigTrait for ChannelConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_base_url = get_env_or_default("FLEET_API_URL", ChannelDefaults::API_BASE_URL);
        let ws_path = get_env_or_default("FLEET_WS_PATH", ChannelDefaults::WS_PATH);

        let keep_alive_interval_ms = get_env_parsed(
            "FLEET_WS_KEEP_ALIVE_MS",
            "keep_alive_interval_ms",
            ChannelDefaults::KEEP_ALIVE_INTERVAL_MS,
            "valid number of milliseconds",
        )?;

        let reconnect_delay_ms = get_env_parsed(
            "FLEET_WS_RECONNECT_DELAY_MS",
            "reconnect_delay_ms",
            ChannelDefaults::RECONNECT_DELAY_MS,
            "valid number of milliseconds",
        )?;

        let max_reconnect_delay_ms = match get_env_optional("FLEET_WS_MAX_RECONNECT_DELAY_MS") {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                ConfigError::invalid_value(
                    "max_reconnect_delay_ms",
                    raw.clone(),
                    "valid number of milliseconds",
                )
            })?),
            None => None,
        };

        let backoff_jitter = get_env_parsed(
            "FLEET_WS_BACKOFF_JITTER",
            "backoff_jitter",
            ChannelDefaults::BACKOFF_JITTER,
            "a fraction between 0 and 1",
        )?;

        let connect_timeout_ms = get_env_parsed(
            "FLEET_WS_CONNECT_TIMEOUT_MS",
            "connect_timeout_ms",
            ChannelDefaults::CONNECT_TIMEOUT_MS,
            "valid number of milliseconds",
        )?;

        let max_message_size = get_env_parsed(
            "FLEET_WS_MAX_MESSAGE_SIZE",
            "max_message_size",
            ChannelDefaults::MAX_MESSAGE_SIZE,
            "valid number of bytes",
        )?;

        Ok(ChannelConfig {
            api_base_url,
            ws_path,
            keep_alive_interval_ms,
            reconnect_delay_ms,
            max_reconnect_delay_ms,
            backoff_jitter,
            connect_timeout_ms,
            max_message_size,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let base = Url::parse(&self.api_base_url).map_err(|e| {
            ConfigError::invalid_value("api_base_url", &self.api_base_url, e.to_string())
        })?;

        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::invalid_value(
                "api_base_url",
                &self.api_base_url,
                "an http:// or https:// URL",
            ));
        }

        if base.host_str().is_none() {
            return Err(ConfigError::invalid_value(
                "api_base_url",
                &self.api_base_url,
                "a URL with a host",
            ));
        }

        if !self.ws_path.starts_with('/') {
            return Err(ConfigError::validation_failed(
                "WebSocket path must start with '/'",
            ));
        }

        if self.keep_alive_interval_ms == 0 {
            return Err(ConfigError::validation_failed(
                "Keep-alive interval must be greater than 0",
            ));
        }

        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::validation_failed(
                "Reconnect delay must be greater than 0",
            ));
        }

        if let Some(max) = self.max_reconnect_delay_ms {
            if max < self.reconnect_delay_ms {
                return Err(ConfigError::validation_failed(
                    "Maximum reconnect delay must not be below the reconnect delay",
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.backoff_jitter) {
            return Err(ConfigError::invalid_value(
                "backoff_jitter",
                self.backoff_jitter.to_string(),
                "a fraction between 0 and 1",
            ));
        }

        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::validation_failed(
                "Connect timeout must be greater than 0",
            ));
        }

        if self.max_message_size == 0 {
            return Err(ConfigError::validation_failed(
                "Maximum message size must be greater than 0",
            ));
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert(
            "api_base_url".to_string(),
            ConfigSource::EnvVar("FLEET_API_URL".to_string()),
        );
        sources.insert(
            "ws_path".to_string(),
            ConfigSource::EnvVar("FLEET_WS_PATH".to_string()),
        );
        sources.insert(
            "keep_alive_interval_ms".to_string(),
            ConfigSource::EnvVar("FLEET_WS_KEEP_ALIVE_MS".to_string()),
        );
        sources.insert(
            "reconnect_delay_ms".to_string(),
            ConfigSource::EnvVar("FLEET_WS_RECONNECT_DELAY_MS".to_string()),
        );
        sources.insert(
            "max_reconnect_delay_ms".to_string(),
            ConfigSource::EnvVar("FLEET_WS_MAX_RECONNECT_DELAY_MS".to_string()),
        );
        sources.insert(
            "backoff_jitter".to_string(),
            ConfigSource::EnvVar("FLEET_WS_BACKOFF_JITTER".to_string()),
        );
        sources.insert(
            "connect_timeout_ms".to_string(),
            ConfigSource::EnvVar("FLEET_WS_CONNECT_TIMEOUT_MS".to_string()),
        );
        sources.insert(
            "max_message_size".to_string(),
            ConfigSource::EnvVar("FLEET_WS_MAX_MESSAGE_SIZE".to_string()),
        );
        sources
    }
}

impl ChannelConfig {
    /// Configuration for the given API base with every other value defaulted
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Switch to capped exponential backoff
    pub fn with_max_reconnect_delay(mut self, max: Duration) -> Self {
        self.max_reconnect_delay_ms = Some(max.as_millis() as u64);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay policy derived from the reconnect settings
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        match self.max_reconnect_delay_ms {
            Some(max) => ReconnectPolicy::exponential(self.reconnect_delay(), Duration::from_millis(max))
                .with_jitter(self.backoff_jitter),
            None => ReconnectPolicy::fixed(self.reconnect_delay()),
        }
    }

    /// Event stream URL for `token`.
    ///
    /// `https` bases map to `wss`, anything else to `ws`. Host and port are
    /// kept, any path on the base is replaced by `ws_path`.
    pub fn websocket_url(&self, token: &str) -> ChannelResult<Url> {
        let base = Url::parse(&self.api_base_url)?;
        let scheme = match base.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(ChannelError::InvalidUrl(format!(
                    "unsupported API scheme '{}'",
                    other
                )))
            }
        };
        let host = base
            .host_str()
            .ok_or_else(|| ChannelError::InvalidUrl("API base URL has no host".to_string()))?;

        let mut url = Url::parse(&format!("{}://{}", scheme, host))?;
        url.set_port(base.port())
            .map_err(|_| ChannelError::InvalidUrl("cannot carry over API port".to_string()))?;
        url.set_path(&self.ws_path);
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}
