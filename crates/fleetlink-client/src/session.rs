//! Authenticated session state shared by every component of the link

use crate::state::LinkStatus;
use fleetlink_core::types::ConnectionStatus;
use fleetlink_wire::LoginResponse;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Snapshot of the controller session.
///
/// `active == true` implies `session_id` holds the controller-assigned id and
/// the control-plane socket is open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub active: bool,
    /// Controller-assigned device id, `None` while inactive
    pub session_id: Option<u32>,
    /// Local address of the control-plane socket
    pub ip: Option<String>,
    /// Long-polls sent during this session
    pub poll_timer_count: u64,
    /// Long-polls sent since the last good reply
    pub keep_alive_timer_count: u64,
}

/// Shared context passed by reference to the connection manager and its
/// workers. State and login parameters sit behind separate locks and
/// neither is held across network I/O.
#[derive(Debug, Default)]
pub struct SessionContext {
    state: Mutex<SessionState>,
    login: Mutex<Option<LoginResponse>>,
    link: LinkStatus,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn session_id(&self) -> Option<u32> {
        self.state.lock().session_id
    }

    /// Parameters of the current login, if any
    pub fn login(&self) -> Option<LoginResponse> {
        *self.login.lock()
    }

    /// Marks the session authenticated after a successful login
    pub fn activate(&self, ip: Option<String>, login: &LoginResponse) {
        *self.login.lock() = Some(*login);
        let mut state = self.state.lock();
        state.active = true;
        state.session_id = Some(login.device_id);
        state.ip = ip;
        state.poll_timer_count = 0;
        state.keep_alive_timer_count = 0;
    }

    pub fn record_poll(&self, answered: bool) {
        let mut state = self.state.lock();
        state.poll_timer_count += 1;
        if answered {
            state.keep_alive_timer_count = 0;
        } else {
            state.keep_alive_timer_count += 1;
        }
    }

    /// Clears the login parameters and session id on teardown
    pub fn deactivate(&self) {
        *self.login.lock() = None;
        let mut state = self.state.lock();
        state.active = false;
        state.session_id = None;
    }

    /// Returns the session to its inactive defaults before a restart
    pub fn reset(&self) {
        *self.login.lock() = None;
        *self.state.lock() = SessionState::default();
    }

    pub fn link(&self) -> &LinkStatus {
        &self.link
    }

    pub fn status(&self) -> ConnectionStatus {
        self.link.status()
    }
}
