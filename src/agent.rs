//! Stand-in collaborators for running the agent without the rest of the
//! device firmware. Commands are logged and acknowledged; live events come
//! from an in-memory queue.

use anyhow::Result;
use async_trait::async_trait;
use fleetlink_client::{
    CommandHandlers, CommandRequest, ControllerStream, LiveEventSource, UserDirectory,
};
use fleetlink_core::types::{LiveEvent, UserGroup};
use fleetlink_wire::{message, ReplyCode};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::info;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct LoggingHandlers;

impl LoggingHandlers {
    async fn acknowledge(request: &CommandRequest, stream: &mut ControllerStream) -> Result<()> {
        info!(
            command = %request.command,
            session_index = ?request.session_index,
            fields = request.payload.len(),
            "Controller command received"
        );
        stream
            .write_frame(&message::config_reply(ReplyCode::Success), REPLY_TIMEOUT)
            .await
    }
}

#[async_trait]
impl CommandHandlers for LoggingHandlers {
    async fn get_config(&self, request: &CommandRequest, stream: &mut ControllerStream) -> Result<()> {
        Self::acknowledge(request, stream).await
    }

    async fn set_config(&self, request: &CommandRequest, stream: &mut ControllerStream) -> Result<()> {
        Self::acknowledge(request, stream).await
    }

    async fn default_config(
        &self,
        request: &CommandRequest,
        stream: &mut ControllerStream,
    ) -> Result<()> {
        Self::acknowledge(request, stream).await
    }

    async fn door_command(
        &self,
        request: &CommandRequest,
        stream: &mut ControllerStream,
    ) -> Result<()> {
        Self::acknowledge(request, stream).await
    }

    async fn execute_command(&self, request: CommandRequest, mut stream: ControllerStream) -> Result<()> {
        Self::acknowledge(&request, &mut stream).await?;
        stream.shutdown().await;
        Ok(())
    }

    async fn file_transfer(&self, request: CommandRequest, mut stream: ControllerStream) -> Result<()> {
        info!(session_index = ?request.session_index, "File transfer requested");
        stream
            .write_frame(&message::transfer_reply(ReplyCode::Success), REPLY_TIMEOUT)
            .await?;
        stream.shutdown().await;
        Ok(())
    }
}

/// Treats session 0 as the local administrator.
#[derive(Debug, Default)]
pub struct LocalUsers;

impl UserDirectory for LocalUsers {
    fn group(&self, session_index: u8) -> Option<UserGroup> {
        (session_index == 0).then_some(UserGroup::Admin)
    }

    fn logout_controller_session(&self) {
        info!("Controller user session logged out");
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Mutex<VecDeque<LiveEvent>>,
}

impl EventQueue {
    pub fn push(&self, event: LiveEvent) {
        self.pending.lock().push_back(event);
    }
}

impl LiveEventSource for EventQueue {
    fn drain(&self, _device_id: u32) -> Vec<LiveEvent> {
        self.pending.lock().drain(..).collect()
    }

    fn requeue(&self, _device_id: u32, events: Vec<LiveEvent>) {
        let mut pending = self.pending.lock();
        for event in events.into_iter().rev() {
            pending.push_front(event);
        }
    }
}
