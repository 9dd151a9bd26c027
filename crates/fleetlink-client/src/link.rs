//! Lifecycle of the controller link

use crate::collaborators::{Collaborators, ControllerConfigSource};
use crate::manager::ConnectionManager;
use crate::session::{SessionContext, SessionState};
use crate::state::MetricsSnapshot;
use fleetlink_core::config::LinkSettings;
use fleetlink_core::error::{ConnectionError, LinkError, Result, TimeoutError};
use fleetlink_core::types::ConnectionStatus;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct Run {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Run {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Entry point of the controller integration.
///
/// At most one connection manager run exists at a time. `start` refuses
/// while a previous run is still winding down.
pub struct ControllerLink {
    settings: LinkSettings,
    ctx: Arc<SessionContext>,
    config: Arc<dyn ControllerConfigSource>,
    collab: Collaborators,
    run: Mutex<Option<Run>>,
}

impl ControllerLink {
    pub fn new(
        settings: LinkSettings,
        config: Arc<dyn ControllerConfigSource>,
        collab: Collaborators,
    ) -> Self {
        Self {
            settings,
            ctx: Arc::new(SessionContext::new()),
            config,
            collab,
            run: Mutex::new(None),
        }
    }

    /// Spawns the connection manager. Must be called within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut run = self.run.lock();
        if run.as_ref().is_some_and(Run::is_running) {
            return Err(LinkError::AlreadyRunning);
        }

        let controller = self.config.controller();
        if !controller.enabled {
            return Err(ConnectionError::Disabled.into());
        }

        info!(endpoint = %controller.endpoint(), "Starting controller link");
        self.ctx.link().set_status(ConnectionStatus::InProgress);

        let cancel = CancellationToken::new();
        let manager = ConnectionManager::new(
            self.settings.clone(),
            self.ctx.clone(),
            self.config.clone(),
            self.collab.clone(),
            cancel.clone(),
        );
        let handle = tokio::spawn(manager.run());
        *run = Some(Run { cancel, handle });

        Ok(())
    }

    /// Requests the current run to stop. Returns immediately.
    pub fn stop(&self) {
        if let Some(run) = self.run.lock().as_ref() {
            if !run.cancel.is_cancelled() {
                info!("Stopping controller link");
            }
            run.cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.lock().as_ref().is_some_and(Run::is_running)
    }

    /// Polls until the current run has finished, bounded by the shutdown
    /// timeout.
    pub async fn wait_stopped(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.settings.shutdown_timeout;
        while self.is_running() {
            if tokio::time::Instant::now() >= deadline {
                warn!("Controller link did not stop in time");
                return Err(TimeoutError::operation(
                    "controller link shutdown",
                    self.settings.shutdown_timeout.as_millis() as u64,
                )
                .into());
            }
            tokio::time::sleep(self.settings.shutdown_poll).await;
        }
        Ok(())
    }

    pub async fn stop_and_wait(&self) -> Result<()> {
        self.stop();
        self.wait_stopped().await
    }

    pub fn status(&self) -> ConnectionStatus {
        self.ctx.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.ctx.link().subscribe()
    }

    pub fn session(&self) -> SessionState {
        self.ctx.snapshot()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.link().metrics().snapshot()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }
}

impl std::fmt::Debug for ControllerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerLink")
            .field("status", &self.status())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
