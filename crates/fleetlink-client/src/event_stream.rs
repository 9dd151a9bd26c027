//! Event streaming worker
//!
//! Every `event_interval` while the session is active, drains the live event
//! source and forwards the batch over one short-lived connection. Events not
//! written when the connect or a write fails go back to the source.

use crate::poll_service::WorkerContext;
use crate::tcp;
use anyhow::Result;
use fleetlink_core::types::LiveEvent;
use fleetlink_wire::message;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct EventStreamer {
    handle: JoinHandle<()>,
}

impl EventStreamer {
    pub fn spawn(worker: Arc<WorkerContext>, interval: Duration, cancel: CancellationToken) -> Self {
        let handle = tokio::spawn(run(worker, interval, cancel));
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Waits for the worker to exit, aborting it after `timeout`.
    pub async fn join(mut self, timeout: Duration) {
        tokio::select! {
            _ = &mut self.handle => {}
            _ = tokio::time::sleep(timeout) => {
                warn!("Event streaming worker did not stop in time, aborting");
                self.handle.abort();
            }
        }
    }
}

async fn run(worker: Arc<WorkerContext>, interval: Duration, cancel: CancellationToken) {
    info!(device_id = worker.device_id, "Event streaming worker started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(session_id) = worker.ctx.session_id().filter(|_| worker.ctx.is_active()) else {
            continue;
        };

        let events = worker.collab.events.drain(session_id);
        if events.is_empty() {
            continue;
        }

        let mut sent = 0;
        match forward(&worker, session_id, &events, &mut sent).await {
            Ok(()) => debug!(sent, "Forwarded live events"),
            Err(e) => {
                let unsent: Vec<LiveEvent> = events.into_iter().skip(sent).collect();
                warn!(sent, requeued = unsent.len(), error = %e, "Failed to forward live events");
                worker.collab.events.requeue(session_id, unsent);
            }
        }
    }

    info!("Event streaming worker stopped");
}

/// Writes `events` in order, counting each one written into `sent`.
async fn forward(
    worker: &WorkerContext,
    session_id: u32,
    events: &[LiveEvent],
    sent: &mut usize,
) -> Result<()> {
    let mut stream = tcp::connect(&worker.endpoint, worker.connect_timeout, None).await?;

    for event in events {
        stream
            .write_frame(&message::live_event(session_id, event), worker.poll_duration)
            .await?;
        worker.ctx.link().metrics().record_event_sent();
        *sent += 1;
    }

    stream.shutdown().await;
    Ok(())
}
