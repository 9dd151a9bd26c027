//! # FleetLink Core
//!
//! Core types, error handling, and configuration for the FleetLink controller
//! integration of a recording device.
//!
//! This crate provides the foundational building blocks shared by the wire
//! codec and the session client:
//!
//! - **Types**: controller settings snapshots, the process-wide
//!   `ConnectionStatus`, session phases, user privilege groups and live events.
//! - **Errors**: the error taxonomy (transport, protocol, configuration,
//!   timeout) using `thiserror`, serializable for status reporting.
//! - **Configuration**: YAML files with environment variable overrides,
//!   validation, and conversion into runtime link settings.
//!
//! ## Example
//!
//! ```
//! use fleetlink_core::config::AppConfig;
//!
//! let config = AppConfig::from_yaml(
//!     "controller:\n  enabled: true\n  address: 10.0.0.5\n  port: 51000\n",
//! )
//! .unwrap();
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.controller.endpoint(), "10.0.0.5:51000");
//! ```

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types for convenience
pub use config::{AppConfig, LinkSettings};
pub use error::{LinkError, Result};
pub use types::{ConnectionStatus, ControllerConfig, LinkPhase, LiveEvent, UserGroup};
