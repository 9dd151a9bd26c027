//! Common test utilities: a scripted mock controller and recording
//! collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use fleetlink_client::{
    Collaborators, CommandHandlers, CommandRequest, ControllerLink, ControllerStream,
    LiveEventSource, SharedControllerConfig, UserDirectory,
};
use fleetlink_core::config::LinkSettings;
use fleetlink_core::types::{ControllerConfig, LiveEvent, UserGroup};
use fleetlink_wire::Frame;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const IO: Duration = Duration::from_secs(5);

/// Installs a test subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::new("fleetlink_client=debug"))
        .try_init();
}

/// Settings with sub-second timings.
pub fn test_settings() -> LinkSettings {
    LinkSettings {
        connect_timeout: Duration::from_secs(1),
        retry_backoff: Duration::from_millis(100),
        event_interval: Duration::from_millis(50),
        max_poll_failures: 3,
        queue_capacity: 50,
        shutdown_timeout: Duration::from_secs(3),
        shutdown_poll: Duration::from_millis(10),
        keepalive: None,
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn login_ack(device_id: u32, poll_duration: u32, poll_interval: u32) -> Frame {
    Frame::new("ACK_LOG")
        .with_field(0)
        .with_field(device_id)
        .with_field(poll_duration)
        .with_field(poll_interval)
}

pub fn login_code(code: u8) -> Frame {
    Frame::new("ACK_LOG").with_field(code)
}

pub fn poll_ack(ports: u8) -> Frame {
    Frame::new("ACK_POL").with_field(0).with_field(ports)
}

pub fn poll_code(code: u8) -> Frame {
    Frame::new("ACK_POL").with_field(code)
}

pub fn command(token: &str, session_index: u8) -> Frame {
    Frame::new(token).with_field(session_index).with_field("record-1")
}

/// What the mock does with one long-poll request.
#[derive(Debug, Clone)]
pub enum PollReply {
    Frame(Frame),
    /// Raw bytes, for malformed frames
    Raw(Vec<u8>),
    /// No reply; the device times out
    Silent,
    /// Reply only after the given delay
    Late(Frame, Duration),
    /// Close the control connection
    Close,
}

/// What the mock does on one worker connection after reading `SND_DID`.
#[derive(Debug, Clone)]
pub enum WorkerAction {
    Send(Frame),
    /// Close without sending a command
    Drop,
}

#[derive(Debug, Default)]
pub struct Script {
    pub logins: VecDeque<Frame>,
    pub polls: VecDeque<PollReply>,
    pub workers: VecDeque<WorkerAction>,
}

#[derive(Debug, Clone, Default)]
pub struct Observed {
    pub logins: usize,
    pub polls: usize,
    pub worker_ids: Vec<u32>,
    /// Frames the device sent back on worker connections
    pub worker_replies: Vec<Frame>,
    pub events: Vec<Frame>,
}

/// Scripted controller on a loopback listener. Connections are told apart
/// by their first frame. Once a script queue is empty the mock logs the
/// device in as id 7 and answers long-polls with nothing pending.
pub struct MockController {
    addr: SocketAddr,
    script: Arc<Mutex<Script>>,
    observed: Arc<Mutex<Observed>>,
    task: JoinHandle<()>,
}

impl MockController {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let script = Arc::new(Mutex::new(Script::default()));
        let observed = Arc::new(Mutex::new(Observed::default()));

        let task = {
            let script = script.clone();
            let observed = observed.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let script = script.clone();
                    let observed = observed.clone();
                    tokio::spawn(async move {
                        serve(ControllerStream::new(socket), script, observed).await;
                    });
                }
            })
        };

        Self {
            addr,
            script,
            observed,
            task,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig::new(self.addr.ip().to_string(), self.addr.port())
    }

    pub fn script(&self) -> parking_lot::MutexGuard<'_, Script> {
        self.script.lock()
    }

    pub fn observed(&self) -> Observed {
        self.observed.lock().clone()
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: ControllerStream, script: Arc<Mutex<Script>>, observed: Arc<Mutex<Observed>>) {
    let Ok(Some(first)) = stream.read_frame(IO).await else {
        return;
    };

    match first.header() {
        "REQ_LOG" => control(stream, script, observed).await,
        "SND_DID" => {
            let id = first.field(0).and_then(|f| f.parse().ok()).unwrap_or(u32::MAX);
            observed.lock().worker_ids.push(id);
            let action = script
                .lock()
                .workers
                .pop_front()
                .unwrap_or(WorkerAction::Send(command("DOR_CMD", 0)));
            if let WorkerAction::Send(frame) = action {
                if stream.write_frame(&frame, IO).await.is_err() {
                    return;
                }
                while let Ok(Some(reply)) = stream.read_frame(IO).await {
                    observed.lock().worker_replies.push(reply);
                }
            }
        }
        "SND_EVT" => {
            observed.lock().events.push(first);
            while let Ok(Some(event)) = stream.read_frame(IO).await {
                observed.lock().events.push(event);
            }
        }
        _ => {}
    }
}

async fn control(mut stream: ControllerStream, script: Arc<Mutex<Script>>, observed: Arc<Mutex<Observed>>) {
    observed.lock().logins += 1;
    let reply = script
        .lock()
        .logins
        .pop_front()
        .unwrap_or_else(|| login_ack(7, 1, 0));
    let success = reply.field(0) == Some("0");
    if stream.write_frame(&reply, IO).await.is_err() || !success {
        return;
    }

    loop {
        let request = match stream.read_frame(Duration::from_secs(30)).await {
            Ok(Some(request)) => request,
            _ => return,
        };
        if request.header() != "REQ_POL" {
            continue;
        }
        observed.lock().polls += 1;

        let action = script.lock().polls.pop_front();
        let written = match action {
            Some(PollReply::Frame(frame)) => stream.write_frame(&frame, IO).await,
            Some(PollReply::Raw(bytes)) => stream
                .get_mut()
                .write_all(&bytes)
                .await
                .map_err(Into::into),
            Some(PollReply::Silent) => Ok(()),
            Some(PollReply::Late(frame, delay)) => {
                tokio::time::sleep(delay).await;
                stream.write_frame(&frame, IO).await
            }
            Some(PollReply::Close) => return,
            None => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                stream.write_frame(&poll_ack(0), IO).await
            }
        };
        if written.is_err() {
            return;
        }
    }
}

/// Records every command handed to a handler.
#[derive(Default)]
pub struct RecordingHandlers {
    calls: Mutex<Vec<CommandRequest>>,
}

impl RecordingHandlers {
    pub fn calls(&self) -> Vec<CommandRequest> {
        self.calls.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl CommandHandlers for RecordingHandlers {
    async fn get_config(&self, r: &CommandRequest, _: &mut ControllerStream) -> anyhow::Result<()> {
        self.calls.lock().push(r.clone());
        Ok(())
    }

    async fn set_config(&self, r: &CommandRequest, _: &mut ControllerStream) -> anyhow::Result<()> {
        self.calls.lock().push(r.clone());
        Ok(())
    }

    async fn default_config(&self, r: &CommandRequest, _: &mut ControllerStream) -> anyhow::Result<()> {
        self.calls.lock().push(r.clone());
        Ok(())
    }

    async fn door_command(&self, r: &CommandRequest, _: &mut ControllerStream) -> anyhow::Result<()> {
        self.calls.lock().push(r.clone());
        Ok(())
    }

    async fn execute_command(&self, r: CommandRequest, mut stream: ControllerStream) -> anyhow::Result<()> {
        self.calls.lock().push(r);
        stream.shutdown().await;
        Ok(())
    }

    async fn file_transfer(&self, r: CommandRequest, mut stream: ControllerStream) -> anyhow::Result<()> {
        self.calls.lock().push(r);
        stream.shutdown().await;
        Ok(())
    }
}

/// Session 0 is an admin, session 1 an operator.
pub struct StaticUsers {
    groups: HashMap<u8, UserGroup>,
    logouts: AtomicUsize,
}

impl Default for StaticUsers {
    fn default() -> Self {
        Self {
            groups: HashMap::from([(0, UserGroup::Admin), (1, UserGroup::Operator)]),
            logouts: AtomicUsize::new(0),
        }
    }
}

impl StaticUsers {
    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::Relaxed)
    }
}

impl UserDirectory for StaticUsers {
    fn group(&self, session_index: u8) -> Option<UserGroup> {
        self.groups.get(&session_index).copied()
    }

    fn logout_controller_session(&self) {
        self.logouts.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
pub struct QueuedEvents {
    pending: Mutex<Vec<LiveEvent>>,
}

impl QueuedEvents {
    pub fn push(&self, event: LiveEvent) {
        self.pending.lock().push(event);
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl LiveEventSource for QueuedEvents {
    fn drain(&self, _device_id: u32) -> Vec<LiveEvent> {
        std::mem::take(&mut *self.pending.lock())
    }

    fn requeue(&self, _device_id: u32, mut events: Vec<LiveEvent>) {
        let mut pending = self.pending.lock();
        events.append(&mut pending);
        *pending = events;
    }
}

/// A link wired to a mock controller and recording collaborators.
pub struct Harness {
    pub mock: MockController,
    pub config: SharedControllerConfig,
    pub handlers: Arc<RecordingHandlers>,
    pub users: Arc<StaticUsers>,
    pub events: Arc<QueuedEvents>,
    pub link: Arc<ControllerLink>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_settings(test_settings()).await
    }

    pub async fn with_settings(settings: LinkSettings) -> Self {
        init_tracing();
        let mock = MockController::start().await;
        let config = SharedControllerConfig::new(mock.controller_config());
        let handlers = Arc::new(RecordingHandlers::default());
        let users = Arc::new(StaticUsers::default());
        let events = Arc::new(QueuedEvents::default());
        let link = Arc::new(ControllerLink::new(
            settings,
            Arc::new(config.clone()),
            Collaborators::new(handlers.clone(), users.clone(), events.clone()),
        ));

        Self {
            mock,
            config,
            handlers,
            users,
            events,
            link,
        }
    }
}
