//! Connection manager
//!
//! Owns the control-plane connection for one run of the link:
//!
//! ```text
//! Disconnected -> Connecting -> LoggingIn -> Active <-> Retrying
//!       ^                                       |
//!       +------------- teardown ----------------+
//! ```
//!
//! Transport failures and failed logins back off and retry until the run is
//! cancelled. A refused login cancels the run. Repeated long-poll failures
//! and long-poll refusals tear the session down and log in again.

use crate::collaborators::{Collaborators, ControllerConfigSource};
use crate::event_stream::EventStreamer;
use crate::poll_service::{PollService, WorkerContext};
use crate::queue::QueueError;
use crate::session::SessionContext;
use crate::tcp::{self, ControllerStream};
use anyhow::Result;
use fleetlink_core::config::LinkSettings;
use fleetlink_core::error::ConnectionError;
use fleetlink_core::types::{ConnectionStatus, LinkPhase};
use fleetlink_wire::{message, Frame, LoginOutcome, LoginResponse, PollOutcome};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Result of one connect and login attempt.
enum LoginStep {
    Active(ControllerStream, LoginResponse),
    Failed(ConnectionError),
}

/// Why a logged-in session ended.
#[derive(Debug)]
enum SessionEnd {
    Stopped,
    /// Torn down by the device; the manager logs in again
    Lost(ConnectionError),
}

enum PollResult {
    Reply(PollOutcome),
    Closed,
    Failed(anyhow::Error),
}

pub struct ConnectionManager {
    settings: LinkSettings,
    ctx: Arc<SessionContext>,
    config: Arc<dyn ControllerConfigSource>,
    collab: Collaborators,
    cancel: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        settings: LinkSettings,
        ctx: Arc<SessionContext>,
        config: Arc<dyn ControllerConfigSource>,
        collab: Collaborators,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            ctx,
            config,
            collab,
            cancel,
        }
    }

    /// Runs until the cancellation token fires, the login is refused, or
    /// the integration is disabled.
    pub async fn run(self) {
        info!("Connection manager started");
        let mut attempt: u64 = 0;

        while !self.cancel.is_cancelled() {
            let controller = self.config.controller();
            if !controller.enabled {
                info!("Controller integration disabled, stopping connection manager");
                break;
            }
            let endpoint = controller.endpoint();
            attempt += 1;

            let step = tokio::select! {
                _ = self.cancel.cancelled() => break,
                step = self.connect_and_login(&endpoint, attempt) => step,
            };

            match step {
                LoginStep::Active(stream, login) => {
                    attempt = 0;
                    let end = self.serve_session(stream, login, &endpoint).await;
                    let SessionEnd::Lost(reason) = end else {
                        info!("Controller session stopped");
                        break;
                    };
                    info!(error = %reason, "Controller session ended");
                    if self.cancel.is_cancelled() {
                        break;
                    }

                    self.collab.users.logout_controller_session();
                    self.ctx.reset();
                    self.ctx.link().set_status(ConnectionStatus::InProgress);
                }
                LoginStep::Failed(e) if e.is_permanent() => {
                    error!(
                        %endpoint,
                        error = %e,
                        "Controller refused login, stopping until restarted"
                    );
                    self.ctx.link().set_status(ConnectionStatus::ConnectionRefused);
                    self.cancel.cancel();
                    break;
                }
                LoginStep::Failed(e) => {
                    warn!(%endpoint, attempt, error = %e, "Login attempt failed");
                    self.ctx.link().set_status(retry_status(&e));
                    self.ctx.link().set_phase(LinkPhase::Disconnected);
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.retry_backoff) => {}
                    }
                }
            }
        }

        self.collab.users.logout_controller_session();
        self.ctx.reset();
        if self.ctx.status() != ConnectionStatus::ConnectionRefused {
            self.ctx.link().set_status(ConnectionStatus::InProgress);
        }
        self.ctx.link().set_phase(LinkPhase::Disconnected);
        self.ctx.link().metrics().mark_disconnected();
        info!(status = ?self.ctx.status(), "Connection manager stopped");
    }

    #[instrument(skip(self))]
    async fn connect_and_login(&self, endpoint: &str, attempt: u64) -> LoginStep {
        let link = self.ctx.link();
        link.set_phase(LinkPhase::Connecting);
        link.metrics().record_login_attempt();

        let mut stream = match tcp::connect(
            endpoint,
            self.settings.connect_timeout,
            self.settings.keepalive,
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => {
                let error = ConnectionError::failed(endpoint, format!("{:#}", e));
                return LoginStep::Failed(error);
            }
        };

        link.set_phase(LinkPhase::LoggingIn);
        let reply = match self.exchange_login(&mut stream).await {
            Ok(reply) => reply,
            Err(e) => {
                stream.shutdown().await;
                let error = ConnectionError::closed(format!("no login reply: {:#}", e));
                return LoginStep::Failed(error);
            }
        };

        let error = match message::parse_login_reply(&reply) {
            Ok(LoginOutcome::Success(login)) => return LoginStep::Active(stream, login),
            Ok(LoginOutcome::Refused) => ConnectionError::refused("login"),
            Ok(LoginOutcome::InProgress) => ConnectionError::pending("login"),
            Ok(LoginOutcome::Failed) => {
                ConnectionError::failed(endpoint, "controller reported login failure")
            }
            Err(e) => ConnectionError::invalid_response(e.to_string()),
        };
        stream.shutdown().await;
        LoginStep::Failed(error)
    }

    async fn exchange_login(&self, stream: &mut ControllerStream) -> Result<Frame> {
        let timeout = self.settings.connect_timeout;
        stream.write_frame(&message::login(), timeout).await?;
        stream.expect_frame(timeout).await
    }

    /// Runs one authenticated session: start workers, long-poll, tear down.
    async fn serve_session(
        &self,
        mut stream: ControllerStream,
        login: LoginResponse,
        endpoint: &str,
    ) -> SessionEnd {
        let link = self.ctx.link();
        let session = self.cancel.child_token();

        self.ctx.activate(stream.local_ip(), &login);
        link.metrics().mark_connected();

        let worker = Arc::new(WorkerContext {
            ctx: self.ctx.clone(),
            collab: self.collab.clone(),
            endpoint: endpoint.to_string(),
            device_id: login.device_id,
            poll_duration: login.poll_duration,
            connect_timeout: self.settings.connect_timeout,
        });
        let mut workers = Workers::new(worker, &self.settings, session.clone());
        workers.ensure_running();

        link.set_status(ConnectionStatus::Connected);
        link.set_phase(LinkPhase::Active);
        info!(
            device_id = login.device_id,
            poll_duration_secs = login.poll_duration.as_secs(),
            poll_interval_secs = login.poll_interval.as_secs(),
            "Logged in to controller"
        );

        let end = self
            .long_poll_loop(&mut stream, &login, &session, &mut workers)
            .await;

        // Teardown
        stream.shutdown().await;
        drop(stream);
        self.ctx.deactivate();
        link.metrics().mark_disconnected();
        session.cancel();
        workers.shutdown(self.settings.shutdown_timeout).await;
        link.set_phase(LinkPhase::Disconnected);

        end
    }

    async fn long_poll_loop(
        &self,
        stream: &mut ControllerStream,
        login: &LoginResponse,
        session: &CancellationToken,
        workers: &mut Workers,
    ) -> SessionEnd {
        let link = self.ctx.link();
        let mut failures: u32 = 0;

        loop {
            // A reply to a poll that already failed must not answer this one
            if failures > 0 {
                match stream.discard_pending() {
                    Ok(0) => {}
                    Ok(bytes) => debug!(bytes, "Discarded late long-poll reply"),
                    Err(e) => debug!(error = %e, "Failed to clear control connection"),
                }
            }

            let result = tokio::select! {
                _ = session.cancelled() => return SessionEnd::Stopped,
                result = Self::long_poll(stream, login) => result,
            };
            link.metrics().record_poll_sent();

            let failure = match result {
                PollResult::Reply(PollOutcome::Pending(ports)) => {
                    if failures > 0 {
                        debug!(failures, "Long-poll recovered");
                        link.set_phase(LinkPhase::Active);
                    }
                    failures = 0;
                    self.ctx.record_poll(true);
                    if ports > 0 {
                        workers.enqueue(ports);
                    }
                    None
                }
                PollResult::Reply(PollOutcome::Refused) => {
                    warn!("Controller refused long-poll, tearing down session");
                    link.set_status(ConnectionStatus::ConnectionFailure);
                    return SessionEnd::Lost(ConnectionError::refused("long-poll"));
                }
                PollResult::Closed => {
                    warn!("Controller closed the control connection");
                    link.set_status(ConnectionStatus::ConnectionFailure);
                    return SessionEnd::Lost(ConnectionError::closed("control connection"));
                }
                PollResult::Reply(PollOutcome::Failed) => {
                    Some("controller reported failure".to_string())
                }
                PollResult::Failed(e) => Some(format!("{:#}", e)),
            };

            if let Some(reason) = failure {
                failures += 1;
                self.ctx.record_poll(false);
                link.metrics().record_poll_failure();
                warn!(retries = failures, error = %reason, "Long-poll failed");

                if failures >= self.settings.max_poll_failures {
                    error!(failures, "Long-poll retries exhausted, restarting session");
                    link.set_status(ConnectionStatus::ConnectionFailure);
                    return SessionEnd::Lost(ConnectionError::PollExhausted { failures });
                }
                link.set_phase(LinkPhase::Retrying);
            }

            if !login.poll_interval.is_zero() {
                tokio::select! {
                    _ = session.cancelled() => return SessionEnd::Stopped,
                    _ = tokio::time::sleep(login.poll_interval) => {}
                }
            }
        }
    }

    async fn long_poll(stream: &mut ControllerStream, login: &LoginResponse) -> PollResult {
        if let Err(e) = stream
            .write_frame(&message::long_poll(login.device_id), login.poll_duration)
            .await
        {
            return PollResult::Failed(e);
        }

        match stream.read_frame(login.poll_duration).await {
            Ok(Some(frame)) => match message::parse_poll_reply(&frame) {
                Ok(outcome) => PollResult::Reply(outcome),
                Err(e) => PollResult::Failed(e.into()),
            },
            Ok(None) => PollResult::Closed,
            Err(e) => PollResult::Failed(e),
        }
    }
}

/// Status reported while backing off after a failed login.
fn retry_status(error: &ConnectionError) -> ConnectionStatus {
    match error {
        ConnectionError::Pending { .. } => ConnectionStatus::ConnectionRequestPending,
        _ => ConnectionStatus::ConnectionFailure,
    }
}

/// The per-session workers.
struct Workers {
    worker: Arc<WorkerContext>,
    queue_capacity: usize,
    event_interval: std::time::Duration,
    session: CancellationToken,
    poll: Option<PollService>,
    events: Option<EventStreamer>,
}

impl Workers {
    fn new(worker: Arc<WorkerContext>, settings: &LinkSettings, session: CancellationToken) -> Self {
        Self {
            worker,
            queue_capacity: settings.queue_capacity,
            event_interval: settings.event_interval,
            session,
            poll: None,
            events: None,
        }
    }

    /// Starts whichever worker is not running.
    fn ensure_running(&mut self) {
        if !self.poll.as_ref().is_some_and(PollService::is_running) {
            self.poll = Some(PollService::spawn(
                self.worker.clone(),
                self.queue_capacity,
                self.session.clone(),
            ));
        }
        if !self.events.as_ref().is_some_and(EventStreamer::is_running) {
            self.events = Some(EventStreamer::spawn(
                self.worker.clone(),
                self.event_interval,
                self.session.clone(),
            ));
        }
    }

    /// Hands `ports` to the poll-service worker. Rejections are logged and
    /// never fail the session.
    fn enqueue(&mut self, ports: u8) {
        let ctx = self.worker.ctx.clone();
        let metrics = ctx.link().metrics();
        let result = match &self.poll {
            Some(poll) if poll.is_running() => poll.enqueue(ports),
            _ => Err(QueueError::Closed),
        };

        let result = match result {
            Err(QueueError::Closed) => {
                warn!(ports, "Poll-service worker not running, restarting it");
                self.ensure_running();
                match &self.poll {
                    Some(poll) => poll.enqueue(ports),
                    None => Err(QueueError::Closed),
                }
            }
            other => other,
        };

        match result {
            Ok(()) => {
                metrics.record_ports_enqueued(ports);
                debug!(ports, "Poll work enqueued");
            }
            Err(e) => {
                metrics.record_queue_rejection();
                warn!(ports, error = %e, "Poll work rejected");
            }
        }
    }

    async fn shutdown(self, timeout: std::time::Duration) {
        self.session.cancel();
        if let Some(poll) = self.poll {
            poll.join(timeout).await;
        }
        if let Some(events) = self.events {
            events.join(timeout).await;
        }
    }
}
