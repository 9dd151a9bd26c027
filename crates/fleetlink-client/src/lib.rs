//! # fleetlink-client
//!
//! Persistent, self-healing session between the device and its controller.
//!
//! - **Connection manager**: connect, login, long-poll, retry and teardown on
//!   the control-plane connection
//! - **Poll-service worker**: one short-lived worker connection per pending
//!   request announced by a long-poll reply, each carrying one command
//! - **Dispatch**: session and privilege checks in front of the command
//!   handlers
//! - **Event streaming worker**: forwards queued live events while the
//!   session is active
//! - **Config-change watcher**: restarts the link once per relevant change
//!
//! ## Example
//!
//! ```rust,no_run
//! use fleetlink_client::{Collaborators, ControllerLink, SharedControllerConfig};
//! use fleetlink_core::{ControllerConfig, LinkSettings};
//! use std::sync::Arc;
//!
//! # async fn run(collaborators: Collaborators) -> fleetlink_core::Result<()> {
//! let config = SharedControllerConfig::new(ControllerConfig::new("10.0.0.5", 51000));
//! let link = ControllerLink::new(LinkSettings::default(), Arc::new(config), collaborators);
//!
//! link.start()?;
//! // ...
//! link.stop_and_wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod dispatch;
pub mod event_stream;
pub mod link;
pub mod manager;
pub mod poll_service;
pub mod queue;
pub mod session;
pub mod state;
pub mod tcp;
pub mod watcher;

pub use collaborators::{
    Collaborators, CommandHandlers, ControllerConfigSource, LiveEventSource,
    SharedControllerConfig, UserDirectory,
};
pub use dispatch::{CommandRequest, DispatchOutcome, DropReason};
pub use link::ControllerLink;
pub use queue::{PollWorkQueue, QueueError};
pub use session::{SessionContext, SessionState};
pub use state::{LinkMetrics, LinkStatus, MetricsSnapshot};
pub use tcp::ControllerStream;
pub use watcher::{ConfigChange, ConfigWatcher, WatchOutcome};
