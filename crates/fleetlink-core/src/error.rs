//! Error types for the FleetLink controller integration.
//!
//! Connection, configuration and shutdown-timeout failures are represented here.
//! All errors implement `std::error::Error` and are serializable so they can be
//! attached to status reports.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using LinkError as the error type.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Top-level error type for controller link operations.
#[derive(Debug, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum LinkError {
    /// Connection-related errors
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(#[from] TimeoutError),

    /// A connection manager run is still active
    #[error("Controller link is already running")]
    AlreadyRunning,
}

/// Errors related to the control-plane and worker connections.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConnectionError {
    /// Failed to establish a connection
    #[error("Failed to connect to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    /// Connection was unexpectedly closed
    #[error("Connection closed unexpectedly: {reason}")]
    ConnectionClosed { reason: String },

    /// Invalid controller response
    #[error("Invalid controller response: {details}")]
    InvalidServerResponse { details: String },

    /// Controller actively refused the request
    #[error("Refused by controller: {operation}")]
    Refused { operation: String },

    /// Controller is still provisioning this device
    #[error("Controller request pending: {operation}")]
    Pending { operation: String },

    /// Consecutive long-poll failures crossed the threshold
    #[error("Long-poll failed {failures} consecutive times")]
    PollExhausted { failures: u32 },

    /// Controller integration is disabled in configuration
    #[error("Controller integration is disabled")]
    Disabled,
}

impl ConnectionError {
    /// Creates a connection failed error.
    pub fn failed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a connection closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }

    /// Creates a refused error.
    pub fn refused(operation: impl Into<String>) -> Self {
        Self::Refused {
            operation: operation.into(),
        }
    }

    /// Creates a pending error.
    pub fn pending(operation: impl Into<String>) -> Self {
        Self::Pending {
            operation: operation.into(),
        }
    }

    /// Creates an invalid response error.
    pub fn invalid_response(details: impl Into<String>) -> Self {
        Self::InvalidServerResponse {
            details: details.into(),
        }
    }

    /// Returns true if retrying won't help until the link is restarted.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ConnectionError::Refused { .. } | ConnectionError::Disabled
        )
    }
}

/// Errors related to configuration.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Invalid configuration format
    #[error("Invalid configuration format: {reason}")]
    InvalidFormat { reason: String },

    /// Missing required configuration field
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    /// Creates a file not found error.
    pub fn file_not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Timeout errors for link operations.
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum TimeoutError {
    /// Operation timed out
    #[error("Operation timed out after {timeout_ms}ms: {operation}")]
    OperationTimeout { operation: String, timeout_ms: u64 },
}

impl TimeoutError {
    /// Creates an operation timeout error.
    pub fn operation(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::OperationTimeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}
