use fleetlink_core::types::{ConnectionStatus, LinkPhase};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::debug;

/// Counters describing the controller link since process start
#[derive(Debug)]
pub struct LinkMetrics {
    /// Control-plane connect attempts
    login_attempts: AtomicU64,
    /// Successful logins
    logins: AtomicU64,
    /// Long-poll requests sent
    polls_sent: AtomicU64,
    /// Long-poll failures (timeouts, malformed replies, refusals)
    poll_failures: AtomicU64,
    /// Worker connections accepted onto the poll work queue
    ports_enqueued: AtomicU64,
    /// Poll work entries rejected by a full or closed queue
    queue_rejections: AtomicU64,
    /// Worker connections attempted
    worker_connections: AtomicU64,
    /// Worker connections that failed before dispatch
    worker_failures: AtomicU64,
    /// Commands handed to a handler
    frames_dispatched: AtomicU64,
    /// Commands dropped or answered negatively
    frames_dropped: AtomicU64,
    /// Live events forwarded
    events_sent: AtomicU64,
    /// Last activity timestamp
    last_activity: RwLock<SystemTime>,
    /// Session established timestamp
    connected_at: RwLock<Option<SystemTime>>,
}

impl Default for LinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self {
            login_attempts: AtomicU64::new(0),
            logins: AtomicU64::new(0),
            polls_sent: AtomicU64::new(0),
            poll_failures: AtomicU64::new(0),
            ports_enqueued: AtomicU64::new(0),
            queue_rejections: AtomicU64::new(0),
            worker_connections: AtomicU64::new(0),
            worker_failures: AtomicU64::new(0),
            frames_dispatched: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            events_sent: AtomicU64::new(0),
            last_activity: RwLock::new(SystemTime::now()),
            connected_at: RwLock::new(None),
        }
    }

    pub fn record_login_attempt(&self) {
        self.login_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_sent(&self) {
        self.polls_sent.fetch_add(1, Ordering::Relaxed);
        self.update_last_activity();
    }

    pub fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ports_enqueued(&self, ports: u8) {
        self.ports_enqueued.fetch_add(ports.into(), Ordering::Relaxed);
    }

    pub fn record_queue_rejection(&self) {
        self.queue_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_connection(&self) {
        self.worker_connections.fetch_add(1, Ordering::Relaxed);
        self.update_last_activity();
    }

    pub fn record_worker_failure(&self) {
        self.worker_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.frames_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_sent(&self) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        self.update_last_activity();
    }

    pub fn update_last_activity(&self) {
        *self.last_activity.write() = SystemTime::now();
    }

    /// Mark a session as established
    pub fn mark_connected(&self) {
        self.logins.fetch_add(1, Ordering::Relaxed);
        *self.connected_at.write() = Some(SystemTime::now());
    }

    pub fn mark_disconnected(&self) {
        *self.connected_at.write() = None;
    }

    pub fn logins(&self) -> u64 {
        self.logins.load(Ordering::Relaxed)
    }

    pub fn login_attempts(&self) -> u64 {
        self.login_attempts.load(Ordering::Relaxed)
    }

    pub fn worker_connections(&self) -> u64 {
        self.worker_connections.load(Ordering::Relaxed)
    }

    pub fn last_activity(&self) -> SystemTime {
        *self.last_activity.read()
    }

    pub fn connected_at(&self) -> Option<SystemTime> {
        *self.connected_at.read()
    }

    /// Get connection duration (if connected)
    pub fn connection_duration(&self) -> Option<Duration> {
        self.connected_at().and_then(|t| t.elapsed().ok())
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            login_attempts: self.login_attempts(),
            logins: self.logins(),
            polls_sent: self.polls_sent.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            ports_enqueued: self.ports_enqueued.load(Ordering::Relaxed),
            queue_rejections: self.queue_rejections.load(Ordering::Relaxed),
            worker_connections: self.worker_connections(),
            worker_failures: self.worker_failures.load(Ordering::Relaxed),
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            last_activity: self.last_activity(),
            connected_at: self.connected_at(),
        }
    }
}

/// Snapshot of link metrics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub login_attempts: u64,
    pub logins: u64,
    pub polls_sent: u64,
    pub poll_failures: u64,
    pub ports_enqueued: u64,
    pub queue_rejections: u64,
    pub worker_connections: u64,
    pub worker_failures: u64,
    pub frames_dispatched: u64,
    pub frames_dropped: u64,
    pub events_sent: u64,
    pub last_activity: SystemTime,
    pub connected_at: Option<SystemTime>,
}

impl MetricsSnapshot {
    /// Fraction of long-polls that failed
    pub fn poll_failure_rate(&self) -> f64 {
        if self.polls_sent > 0 {
            self.poll_failures as f64 / self.polls_sent as f64
        } else {
            0.0
        }
    }
}

/// Published connection status, current state machine phase and metrics
#[derive(Debug)]
pub struct LinkStatus {
    status: watch::Sender<ConnectionStatus>,
    phase: RwLock<LinkPhase>,
    metrics: LinkMetrics,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkStatus {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::InProgress);
        Self {
            status,
            phase: RwLock::new(LinkPhase::Disconnected),
            metrics: LinkMetrics::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Publishes a status transition
    pub fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(from = %previous, to = %status, "Connection status changed");
        }
    }

    /// Receiver that observes every status transition
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn phase(&self) -> LinkPhase {
        *self.phase.read()
    }

    pub fn set_phase(&self, phase: LinkPhase) {
        let previous = std::mem::replace(&mut *self.phase.write(), phase);
        if previous != phase {
            debug!(from = %previous, to = %phase, "Link phase changed");
        }
    }

    pub fn metrics(&self) -> &LinkMetrics {
        &self.metrics
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.status(), ConnectionStatus::Connected)
    }
}
