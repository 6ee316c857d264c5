//! # Structured Logging
//!
//! `tracing-subscriber` setup for applications embedding the realtime
//! channel: env-filtered text, pretty or JSON output.

use fleet_core::{get_env_optional, get_env_or_default, AppConfigTrait, ConfigError, ConfigSource, Environment};
use std::collections::HashMap;
use std::io;
use std::str::FromStr;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" | "text" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::invalid_value("format", s, "compact, pretty, or json")),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    pub format: LogFormat,
    /// Include file and line number information
    pub include_location: bool,
    /// Environment filter (supports directives like "fleet_realtime=debug,tokio_tungstenite=warn")
    pub env_filter: Option<String>,
    /// Service name attached to the initialization event
    pub service_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            include_location: false,
            env_filter: None,
            service_name: None,
        }
    }
}

impl LoggingConfig {
    /// Create production logging configuration
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            include_location: false,
            env_filter: Some("fleet_realtime=info,tokio_tungstenite=warn,tungstenite=warn".to_string()),
            service_name: None,
        }
    }

    /// Create development logging configuration
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            include_location: true,
            env_filter: Some("fleet_realtime=debug,tokio_tungstenite=info".to_string()),
            service_name: None,
        }
    }

    /// Create test logging configuration (minimal output)
    pub fn test() -> Self {
        Self {
            level: "error".to_string(),
            format: LogFormat::Compact,
            include_location: false,
            env_filter: Some("fleet_realtime=error".to_string()),
            service_name: None,
        }
    }

    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Development => Self::development(),
            Environment::Testing => Self::test(),
            Environment::Production => Self::production(),
        }
    }

    pub fn with_service(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }
}

impl AppConfigTrait for LoggingConfig {
    /// Preset for `APP_ENV`, overridden by `LOG_LEVEL`, `LOG_FORMAT` and `LOG_FILTER`
    fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::for_environment(Environment::from_env()?);

        if let Some(level) = get_env_optional("LOG_LEVEL") {
            config.level = level;
            // An explicit level replaces the preset's filter directives
            config.env_filter = None;
        }
        let format = get_env_or_default("LOG_FORMAT", "");
        if !format.is_empty() {
            config.format = format.parse()?;
        }
        if let Some(filter) = get_env_optional("LOG_FILTER") {
            config.env_filter = Some(filter);
        }

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::invalid_value(
                "level",
                &self.level,
                "trace, debug, info, warn, or error",
            ));
        }

        if let Some(filter) = &self.env_filter {
            EnvFilter::try_new(filter).map_err(|e| {
                ConfigError::invalid_value("env_filter", filter, e.to_string())
            })?;
        }

        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert("level".to_string(), ConfigSource::EnvVar("LOG_LEVEL".to_string()));
        sources.insert("format".to_string(), ConfigSource::EnvVar("LOG_FORMAT".to_string()));
        sources.insert("env_filter".to_string(), ConfigSource::EnvVar("LOG_FILTER".to_string()));
        sources.insert("include_location".to_string(), ConfigSource::Default("APP_ENV preset".to_string()));
        sources
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let directives = config.env_filter.as_deref().unwrap_or(&config.level);
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directives))?;

    let layer = Layer::new()
        .with_writer(io::stdout)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(layer.pretty())
            .try_init()?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(layer.compact())
            .try_init()?,
    }

    tracing::info!(
        target: "fleet_realtime::logging",
        level = %config.level,
        format = ?config.format,
        service = config.service_name.as_deref().unwrap_or("fleetdesk"),
        "Structured logging initialized"
    );

    Ok(())
}
