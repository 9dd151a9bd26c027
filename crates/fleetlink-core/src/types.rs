//! Core types for the FleetLink controller integration.
//!
//! Defines the controller settings snapshot, the status value exposed to the
//! rest of the device, session phases, user privilege groups and live events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Controller integration settings as stored in the device's general config.
///
/// The connection manager reads a fresh snapshot on every connect attempt, so
/// an edited address takes effect on the next connect.
///
/// # Examples
///
/// ```
/// use fleetlink_core::types::ControllerConfig;
///
/// let controller = ControllerConfig::new("192.168.1.20", 51000);
/// assert!(controller.enabled);
/// assert_eq!(controller.endpoint(), "192.168.1.20:51000");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Whether controller integration is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Controller IP address or hostname
    #[serde(default)]
    pub address: String,

    /// Controller TCP port
    #[serde(default = "default_controller_port")]
    pub port: u16,
}

fn default_controller_port() -> u16 {
    51000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: String::new(),
            port: default_controller_port(),
        }
    }
}

impl ControllerConfig {
    /// Creates an enabled controller configuration.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            enabled: true,
            address: address.into(),
            port,
        }
    }

    /// Returns the `host:port` string used to connect.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Returns true if both snapshots point at the same controller.
    pub fn same_endpoint(&self, other: &ControllerConfig) -> bool {
        self.address == other.address && self.port == other.port
    }
}

/// Connection status published for UI and status collaborators.
///
/// Only the connection manager and the config-change watcher write it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Connecting, logging in, or restarting
    InProgress,
    /// Logged in and long-polling
    Connected,
    /// Transport failure or exhausted long-poll retries
    ConnectionFailure,
    /// Controller refused the login; no automatic retry
    ConnectionRefused,
    /// Controller is still provisioning this device
    ConnectionRequestPending,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::InProgress => write!(f, "In Progress"),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::ConnectionFailure => write!(f, "Connection Failure"),
            ConnectionStatus::ConnectionRefused => write!(f, "Connection Refused"),
            ConnectionStatus::ConnectionRequestPending => write!(f, "Connection Request Pending"),
        }
    }
}

/// Phase of the connection manager state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPhase {
    Disconnected,
    Connecting,
    LoggingIn,
    /// Authenticated and long-polling
    Active,
    /// Long-poll failed, retrying on the same socket
    Retrying,
}

impl fmt::Display for LinkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkPhase::Disconnected => write!(f, "Disconnected"),
            LinkPhase::Connecting => write!(f, "Connecting"),
            LinkPhase::LoggingIn => write!(f, "Logging In"),
            LinkPhase::Active => write!(f, "Active"),
            LinkPhase::Retrying => write!(f, "Retrying"),
        }
    }
}

/// Privilege group of a logged-in user session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserGroup {
    Admin,
    Operator,
    Viewer,
}

impl UserGroup {
    /// Returns true for the group allowed to change configuration.
    pub fn is_admin(&self) -> bool {
        matches!(self, UserGroup::Admin)
    }
}

/// A live event queued for forwarding to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveEvent {
    /// When the event happened on the device
    pub occurred_at: DateTime<Utc>,
    /// Event type, e.g. `motion` or `sensor`
    pub kind: String,
    /// Originating camera, sensor or subsystem
    pub source: String,
    /// Free-form detail text
    pub detail: String,
}

impl LiveEvent {
    /// Creates an event stamped with the current time.
    pub fn new(
        kind: impl Into<String>,
        source: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            occurred_at: Utc::now(),
            kind: kind.into(),
            source: source.into(),
            detail: detail.into(),
        }
    }
}
