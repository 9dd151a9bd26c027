//! Poll-service worker
//!
//! Drains the poll work queue. Every `portsToOpen` entry `K` becomes `K`
//! short-lived worker connections, opened one after another: identify with
//! the device id, receive one command, dispatch it.

use crate::collaborators::Collaborators;
use crate::dispatch::{dispatch, DispatchOutcome};
use crate::queue::{poll_work_queue, PollWorkQueue, PollWorkReceiver, QueueError};
use crate::session::SessionContext;
use crate::tcp;
use anyhow::Result;
use fleetlink_wire::message;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a worker needs from the session that spawned it.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub ctx: Arc<SessionContext>,
    pub collab: Collaborators,
    /// Controller endpoint the session logged in to
    pub endpoint: String,
    pub device_id: u32,
    /// Receive timeout granted at login
    pub poll_duration: Duration,
    pub connect_timeout: Duration,
}

/// Handle to a running poll-service worker and the producer side of its
/// queue.
#[derive(Debug)]
pub struct PollService {
    queue: PollWorkQueue,
    handle: JoinHandle<()>,
}

impl PollService {
    /// Spawns a worker with a fresh queue; it exits when `cancel` fires.
    pub fn spawn(worker: Arc<WorkerContext>, capacity: usize, cancel: CancellationToken) -> Self {
        let (queue, rx) = poll_work_queue(capacity);
        let handle = tokio::spawn(run(worker, rx, cancel));
        Self { queue, handle }
    }

    pub fn enqueue(&self, ports: u8) -> Result<(), QueueError> {
        self.queue.enqueue(ports)
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Waits for the worker to exit, aborting it after `timeout`.
    pub async fn join(self, timeout: Duration) {
        let Self { queue, mut handle } = self;
        drop(queue);
        tokio::select! {
            _ = &mut handle => {}
            _ = tokio::time::sleep(timeout) => {
                warn!("Poll-service worker did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

async fn run(worker: Arc<WorkerContext>, rx: PollWorkReceiver, cancel: CancellationToken) {
    info!(device_id = worker.device_id, "Poll-service worker started");

    loop {
        let ports = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            ports = rx.recv() => match ports {
                Some(ports) => ports,
                None => break,
            },
        };

        serve_batch(&worker, ports, &cancel).await;
    }

    let discarded = rx.clear();
    info!(discarded, "Poll-service worker stopped");
}

/// Opens `ports` worker connections in order. A failed connection is
/// logged and the batch carries on with the next one.
pub async fn serve_batch(worker: &WorkerContext, ports: u8, cancel: &CancellationToken) {
    debug!(ports, "Serving poll work");

    for i in 1..=ports {
        if cancel.is_cancelled() {
            debug!(remaining = ports - i + 1, "Stop requested, abandoning batch");
            break;
        }

        match serve_one(worker).await {
            Ok(outcome) => debug!(connection = i, ?outcome, "Worker connection served"),
            Err(e) => {
                worker.ctx.link().metrics().record_worker_failure();
                warn!(connection = i, ports, error = %e, "Worker connection failed");
            }
        }
    }
}

async fn serve_one(worker: &WorkerContext) -> Result<DispatchOutcome> {
    worker.ctx.link().metrics().record_worker_connection();

    let mut stream = tcp::connect(&worker.endpoint, worker.connect_timeout, None).await?;
    stream
        .write_frame(&message::send_device_id(worker.device_id), worker.poll_duration)
        .await?;
    let frame = stream.expect_frame(worker.poll_duration).await?;

    Ok(dispatch(frame, stream, &worker.ctx, &worker.collab, worker.poll_duration).await)
}
