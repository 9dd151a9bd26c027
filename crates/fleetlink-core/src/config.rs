//! Configuration management for the FleetLink controller integration.
//!
//! This module provides:
//! - Loading from YAML files
//! - Environment variable overrides (`FLEETLINK__*`)
//! - Validation of all settings
//! - Conversion into the `Duration`-based [`LinkSettings`] used at runtime

use crate::error::{ConfigError, Result};
use crate::types::ControllerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Main application configuration.
///
/// # Examples
///
/// ```no_run
/// use fleetlink_core::config::AppConfig;
///
/// let config = AppConfig::from_file("config/fleetlink.yaml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Controller integration settings
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Session timing and capacity settings
    #[serde(default)]
    pub link: LinkConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path.display().to_string()).into());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate: the YAML file first,
    /// then `FLEETLINK__SECTION__KEY` environment overrides.
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("FLEETLINK")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<()> {
        if self.controller.enabled {
            if self.controller.address.trim().is_empty() {
                return Err(ConfigError::missing_field("controller.address").into());
            }
            if self.controller.port == 0 {
                return Err(
                    ConfigError::invalid_value("controller.port", "Port cannot be 0").into(),
                );
            }
        }

        self.link.validate()?;
        self.logging.parse_level()?;

        Ok(())
    }
}

/// Timing and capacity settings for the controller session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Per-attempt connect and login reply timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Backoff between failed connect/login attempts
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,

    /// Interval between live event forwarding rounds
    #[serde(default = "default_event_interval")]
    pub event_interval_secs: u64,

    /// Consecutive long-poll failures before the session is torn down
    #[serde(default = "default_max_poll_failures")]
    pub max_poll_failures: u32,

    /// Poll work queue capacity (holds at most `capacity - 1` entries)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound on waiting for workers and runs to stop
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// TCP keepalive on the control-plane socket (0 = disabled)
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_retry_backoff() -> u64 {
    5
}

fn default_event_interval() -> u64 {
    2
}

fn default_max_poll_failures() -> u32 {
    3
}

fn default_queue_capacity() -> usize {
    50
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_keepalive() -> u64 {
    30
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            retry_backoff_secs: default_retry_backoff(),
            event_interval_secs: default_event_interval(),
            max_poll_failures: default_max_poll_failures(),
            queue_capacity: default_queue_capacity(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            keepalive_secs: default_keepalive(),
        }
    }
}

impl LinkConfig {
    /// Validates the link settings.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity < 2 {
            return Err(ConfigError::invalid_value(
                "link.queue_capacity",
                "Queue capacity must be at least 2",
            )
            .into());
        }

        if self.max_poll_failures == 0 {
            return Err(ConfigError::invalid_value(
                "link.max_poll_failures",
                "At least one failure must be tolerated",
            )
            .into());
        }

        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "link.connect_timeout_secs",
                "Timeout cannot be 0",
            )
            .into());
        }

        if self.event_interval_secs == 0 {
            return Err(ConfigError::invalid_value(
                "link.event_interval_secs",
                "Interval cannot be 0",
            )
            .into());
        }

        Ok(())
    }

    /// Converts into runtime settings.
    pub fn settings(&self) -> LinkSettings {
        LinkSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
            event_interval: Duration::from_secs(self.event_interval_secs),
            max_poll_failures: self.max_poll_failures,
            queue_capacity: self.queue_capacity,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            shutdown_poll: Duration::from_millis(100),
            keepalive: (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs)),
        }
    }
}

/// Runtime settings consumed by the connection manager and its workers.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Connect timeout, also bounds the wait for the login reply
    pub connect_timeout: Duration,
    /// Sleep after a failed connect or login attempt
    pub retry_backoff: Duration,
    /// Period of the event streaming worker
    pub event_interval: Duration,
    /// Consecutive long-poll failures that trigger teardown
    pub max_poll_failures: u32,
    /// Poll work queue capacity
    pub queue_capacity: usize,
    /// Bound for waiting on stopped workers and runs
    pub shutdown_timeout: Duration,
    /// Recheck period while waiting for a stop
    pub shutdown_poll: Duration,
    /// TCP keepalive time for the control-plane socket
    pub keepalive: Option<Duration>,
}

impl Default for LinkSettings {
    fn default() -> Self {
        LinkConfig::default().settings()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}
