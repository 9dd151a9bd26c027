//! Config-change watcher
//!
//! Restarts the controller link once per relevant configuration change. A
//! change arriving while another one is still being applied is rejected,
//! not queued.

use crate::link::ControllerLink;
use fleetlink_core::types::{ConnectionStatus, ControllerConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A change that requires the link to stop or restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    Enabled,
    Disabled,
    /// Address or port changed while enabled
    EndpointChanged,
}

impl ConfigChange {
    pub fn between(old: &ControllerConfig, new: &ControllerConfig) -> Option<Self> {
        match (old.enabled, new.enabled) {
            (true, false) => Some(ConfigChange::Disabled),
            (false, true) => Some(ConfigChange::Enabled),
            (true, true) if !old.same_endpoint(new) => Some(ConfigChange::EndpointChanged),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum WatchOutcome {
    /// Nothing relevant changed
    Unchanged,
    /// A previous change is still being applied
    Busy,
    /// The change is being applied by the returned task
    Scheduled(JoinHandle<()>),
}

#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    link: Arc<ControllerLink>,
    handling: Arc<Mutex<bool>>,
}

/// Clears the in-flight flag when the change task ends, however it ends.
struct HandlingGuard(Arc<Mutex<bool>>);

impl Drop for HandlingGuard {
    fn drop(&mut self) {
        *self.0.lock() = false;
    }
}

impl ConfigWatcher {
    pub fn new(link: Arc<ControllerLink>) -> Self {
        Self {
            link,
            handling: Arc::new(Mutex::new(false)),
        }
    }

    /// Reacts to an edit of the controller settings. The config source read
    /// by the link must already hold `new`.
    pub fn notify(&self, old: &ControllerConfig, new: &ControllerConfig) -> WatchOutcome {
        let Some(change) = ConfigChange::between(old, new) else {
            return WatchOutcome::Unchanged;
        };

        self.link.context().link().set_status(ConnectionStatus::InProgress);

        {
            let mut handling = self.handling.lock();
            if *handling {
                warn!(?change, "Config change already in progress, ignoring");
                return WatchOutcome::Busy;
            }
            *handling = true;
        }

        info!(?change, endpoint = %new.endpoint(), "Controller settings changed");
        let guard = HandlingGuard(self.handling.clone());
        let link = self.link.clone();
        WatchOutcome::Scheduled(tokio::spawn(async move {
            let _guard = guard;
            apply(&link, change).await;
        }))
    }

    pub fn is_handling(&self) -> bool {
        *self.handling.lock()
    }
}

async fn apply(link: &ControllerLink, change: ConfigChange) {
    link.stop();
    if let Err(e) = link.wait_stopped().await {
        error!(error = %e, "Controller link still running, not restarting");
        return;
    }

    if change == ConfigChange::Disabled {
        info!("Controller integration disabled");
        return;
    }

    match link.start() {
        Ok(()) => info!(?change, "Controller link restarted"),
        Err(e) => error!(error = %e, "Failed to restart controller link"),
    }
}
