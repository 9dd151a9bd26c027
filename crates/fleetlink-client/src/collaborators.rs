//! Interfaces to the device subsystems the link talks to
//!
//! Configuration storage, user-session bookkeeping, the event log and the
//! business logic behind each controller command live outside this crate.

use crate::dispatch::CommandRequest;
use crate::tcp::ControllerStream;
use anyhow::Result;
use async_trait::async_trait;
use fleetlink_core::types::{ControllerConfig, LiveEvent, UserGroup};
use parking_lot::RwLock;
use std::sync::Arc;

/// Source of the controller settings, read on every connect attempt.
pub trait ControllerConfigSource: Send + Sync {
    fn controller(&self) -> ControllerConfig;
}

/// In-memory controller settings shared with whoever edits them.
#[derive(Debug, Clone, Default)]
pub struct SharedControllerConfig {
    inner: Arc<RwLock<ControllerConfig>>,
}

impl SharedControllerConfig {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Stores new settings and returns the previous ones.
    pub fn replace(&self, config: ControllerConfig) -> ControllerConfig {
        std::mem::replace(&mut *self.inner.write(), config)
    }
}

impl ControllerConfigSource for SharedControllerConfig {
    fn controller(&self) -> ControllerConfig {
        self.inner.read().clone()
    }
}

/// Logged-in local user sessions.
pub trait UserDirectory: Send + Sync {
    /// Privilege group of a session, `None` if no such session is logged in
    fn group(&self, session_index: u8) -> Option<UserGroup>;

    /// Logs out the local session tied to the controller link
    fn logout_controller_session(&self);
}

/// Queue of live events waiting to be forwarded.
pub trait LiveEventSource: Send + Sync {
    /// Takes every pending event for the given device id.
    fn drain(&self, device_id: u32) -> Vec<LiveEvent>;

    /// Puts back drained events that could not be forwarded. They go ahead
    /// of anything queued since the drain.
    fn requeue(&self, device_id: u32, events: Vec<LiveEvent>);
}

/// Handlers for controller-issued commands.
///
/// Borrowing handlers leave the connection to the caller, which closes it.
/// Owning handlers receive the stream and must close it themselves.
#[async_trait]
pub trait CommandHandlers: Send + Sync {
    async fn get_config(&self, request: &CommandRequest, stream: &mut ControllerStream)
        -> Result<()>;

    async fn set_config(&self, request: &CommandRequest, stream: &mut ControllerStream)
        -> Result<()>;

    async fn default_config(
        &self,
        request: &CommandRequest,
        stream: &mut ControllerStream,
    ) -> Result<()>;

    async fn door_command(
        &self,
        request: &CommandRequest,
        stream: &mut ControllerStream,
    ) -> Result<()>;

    async fn execute_command(&self, request: CommandRequest, stream: ControllerStream)
        -> Result<()>;

    async fn file_transfer(&self, request: CommandRequest, stream: ControllerStream) -> Result<()>;
}

/// Bundle of collaborators handed to the link.
#[derive(Clone)]
pub struct Collaborators {
    pub handlers: Arc<dyn CommandHandlers>,
    pub users: Arc<dyn UserDirectory>,
    pub events: Arc<dyn LiveEventSource>,
}

impl Collaborators {
    pub fn new(
        handlers: Arc<dyn CommandHandlers>,
        users: Arc<dyn UserDirectory>,
        events: Arc<dyn LiveEventSource>,
    ) -> Self {
        Self {
            handlers,
            users,
            events,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
