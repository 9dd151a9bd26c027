//! Dispatch of controller commands received on worker connections
//!
//! Each command has a fixed route: whether the sending user session must be
//! valid, the privilege it needs, and who closes the connection afterwards.

use crate::collaborators::Collaborators;
use crate::session::SessionContext;
use crate::tcp::ControllerStream;
use fleetlink_core::types::UserGroup;
use fleetlink_wire::{message, ControllerCommand, Frame, ReplyCode, WireError};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Any,
    Admin,
}

/// Who closes the worker connection once the handler was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Core,
    Handler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub command: ControllerCommand,
    pub session_check: bool,
    pub privilege: Privilege,
    pub ownership: Ownership,
}

/// Route table in command table order.
pub const ROUTES: [Route; 6] = [
    Route {
        command: ControllerCommand::GetConfig,
        session_check: true,
        privilege: Privilege::Any,
        ownership: Ownership::Core,
    },
    Route {
        command: ControllerCommand::SetConfig,
        session_check: true,
        privilege: Privilege::Admin,
        ownership: Ownership::Core,
    },
    Route {
        command: ControllerCommand::DefaultConfig,
        session_check: true,
        privilege: Privilege::Admin,
        ownership: Ownership::Core,
    },
    Route {
        command: ControllerCommand::SetCommand,
        session_check: true,
        privilege: Privilege::Any,
        ownership: Ownership::Handler,
    },
    Route {
        command: ControllerCommand::FileTransfer,
        session_check: true,
        privilege: Privilege::Any,
        ownership: Ownership::Handler,
    },
    Route {
        command: ControllerCommand::DoorCommand,
        session_check: false,
        privilege: Privilege::Any,
        ownership: Ownership::Core,
    },
];

pub fn route(command: ControllerCommand) -> &'static Route {
    &ROUTES[command.index()]
}

/// A decoded controller command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: ControllerCommand,
    /// User session index from the first field, `None` if absent or invalid
    pub session_index: Option<u8>,
    /// Remaining fields, opaque to the link
    pub payload: Vec<String>,
}

impl CommandRequest {
    pub fn from_frame(frame: &Frame) -> Result<Self, WireError> {
        let command = frame.command_kind()?;
        let session_index = frame.field(0).and_then(|field| field.parse().ok());
        let payload = frame.fields().iter().skip(1).cloned().collect();

        Ok(Self {
            command,
            session_index,
            payload,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Token not in the controller command table
    UnknownCommand,
    /// No such user session or the controller session is inactive
    InvalidSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Borrowing handler ran; the connection was closed here
    Handled(ControllerCommand),
    /// Owning handler took the connection
    HandedOff(ControllerCommand),
    /// Discarded without invoking a handler
    Dropped(DropReason),
    /// Answered with a negative reply without invoking a handler
    Rejected(ControllerCommand, ReplyCode),
}

/// Dispatches one command frame received on a worker connection.
pub async fn dispatch(
    frame: Frame,
    mut stream: ControllerStream,
    ctx: &SessionContext,
    collab: &Collaborators,
    io_timeout: Duration,
) -> DispatchOutcome {
    let metrics = ctx.link().metrics();

    let request = match CommandRequest::from_frame(&frame) {
        Ok(request) => request,
        Err(e) => {
            debug!(header = frame.header(), error = %e, "Ignoring unrecognised command");
            metrics.record_dropped();
            stream.shutdown().await;
            return DispatchOutcome::Dropped(DropReason::UnknownCommand);
        }
    };
    let route = route(request.command);

    let group = if route.session_check {
        match session_group(&request, ctx, collab) {
            Some(group) => Some(group),
            None => {
                debug!(
                    command = %request.command,
                    session_index = ?request.session_index,
                    "Dropping command for invalid session"
                );
                metrics.record_dropped();
                let outcome = if request.command == ControllerCommand::FileTransfer {
                    reply(&mut stream, message::transfer_reply(ReplyCode::InvalidSession), io_timeout)
                        .await;
                    DispatchOutcome::Rejected(request.command, ReplyCode::InvalidSession)
                } else {
                    DispatchOutcome::Dropped(DropReason::InvalidSession)
                };
                stream.shutdown().await;
                return outcome;
            }
        }
    } else {
        None
    };

    if route.privilege == Privilege::Admin && !group.is_some_and(|g| g.is_admin()) {
        warn!(
            command = %request.command,
            session_index = ?request.session_index,
            "Rejecting command without admin privilege"
        );
        metrics.record_dropped();
        reply(&mut stream, message::config_reply(ReplyCode::NoPrivilege), io_timeout).await;
        stream.shutdown().await;
        return DispatchOutcome::Rejected(request.command, ReplyCode::NoPrivilege);
    }

    metrics.record_dispatched();
    let command = request.command;

    match route.ownership {
        Ownership::Handler => {
            let handlers = collab.handlers.clone();
            tokio::spawn(async move {
                let result = match command {
                    ControllerCommand::FileTransfer => handlers.file_transfer(request, stream).await,
                    _ => handlers.execute_command(request, stream).await,
                };
                if let Err(e) = result {
                    warn!(%command, error = %e, "Command handler failed");
                }
            });
            DispatchOutcome::HandedOff(command)
        }
        Ownership::Core => {
            let handlers = &collab.handlers;
            let result = match command {
                ControllerCommand::GetConfig => handlers.get_config(&request, &mut stream).await,
                ControllerCommand::SetConfig => handlers.set_config(&request, &mut stream).await,
                ControllerCommand::DefaultConfig => {
                    handlers.default_config(&request, &mut stream).await
                }
                _ => handlers.door_command(&request, &mut stream).await,
            };
            if let Err(e) = result {
                warn!(%command, error = %e, "Command handler failed");
            }
            stream.shutdown().await;
            DispatchOutcome::Handled(command)
        }
    }
}

fn session_group(
    request: &CommandRequest,
    ctx: &SessionContext,
    collab: &Collaborators,
) -> Option<UserGroup> {
    let index = request.session_index?;
    if !ctx.is_active() {
        return None;
    }
    collab.users.group(index)
}

async fn reply(stream: &mut ControllerStream, frame: Frame, io_timeout: Duration) {
    if let Err(e) = stream.write_frame(&frame, io_timeout).await {
        warn!(header = frame.header(), error = %e, "Failed to send reply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CommandHandlers, LiveEventSource, UserDirectory};
    use async_trait::async_trait;
    use fleetlink_core::types::LiveEvent;
    use fleetlink_wire::LoginResponse;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<CommandRequest>>,
    }

    impl Recorder {
        fn commands(&self) -> Vec<ControllerCommand> {
            self.calls.lock().iter().map(|r| r.command).collect()
        }
    }

    #[async_trait]
    impl CommandHandlers for Recorder {
        async fn get_config(&self, r: &CommandRequest, _: &mut ControllerStream) -> anyhow::Result<()> {
            self.calls.lock().push(r.clone());
            Ok(())
        }

        async fn set_config(&self, r: &CommandRequest, _: &mut ControllerStream) -> anyhow::Result<()> {
            self.calls.lock().push(r.clone());
            Ok(())
        }

        async fn default_config(
            &self,
            r: &CommandRequest,
            _: &mut ControllerStream,
        ) -> anyhow::Result<()> {
            self.calls.lock().push(r.clone());
            Ok(())
        }

        async fn door_command(
            &self,
            r: &CommandRequest,
            _: &mut ControllerStream,
        ) -> anyhow::Result<()> {
            self.calls.lock().push(r.clone());
            Ok(())
        }

        async fn execute_command(&self, r: CommandRequest, _: ControllerStream) -> anyhow::Result<()> {
            self.calls.lock().push(r);
            Ok(())
        }

        async fn file_transfer(&self, r: CommandRequest, _: ControllerStream) -> anyhow::Result<()> {
            self.calls.lock().push(r);
            Ok(())
        }
    }

    struct Users;

    impl UserDirectory for Users {
        fn group(&self, session_index: u8) -> Option<UserGroup> {
            match session_index {
                0 => Some(UserGroup::Admin),
                1 => Some(UserGroup::Operator),
                _ => None,
            }
        }

        fn logout_controller_session(&self) {}
    }

    struct NoEvents;

    impl LiveEventSource for NoEvents {
        fn drain(&self, _device_id: u32) -> Vec<LiveEvent> {
            Vec::new()
        }

        fn requeue(&self, _: u32, _: Vec<LiveEvent>) {}
    }

    fn setup() -> (Arc<Recorder>, Collaborators, SessionContext) {
        let recorder = Arc::new(Recorder::default());
        let collab = Collaborators::new(recorder.clone(), Arc::new(Users), Arc::new(NoEvents));
        let ctx = SessionContext::new();
        ctx.activate(
            None,
            &LoginResponse {
                device_id: 3,
                poll_duration: Duration::from_secs(1),
                poll_interval: Duration::ZERO,
            },
        );
        (recorder, collab, ctx)
    }

    async fn pair() -> (ControllerStream, ControllerStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (
            ControllerStream::new(client.unwrap()),
            ControllerStream::new(accepted.unwrap().0),
        )
    }

    fn command(token: &str, session: u8) -> Frame {
        Frame::new(token).with_field(session).with_field("payload")
    }

    const IO: Duration = Duration::from_secs(1);

    #[test]
    fn test_route_table_matches_command_order() {
        for command in ControllerCommand::ALL {
            assert_eq!(route(command).command, command);
        }
        assert_eq!(route(ControllerCommand::SetConfig).privilege, Privilege::Admin);
        assert_eq!(route(ControllerCommand::SetCommand).ownership, Ownership::Handler);
        assert!(!route(ControllerCommand::DoorCommand).session_check);
    }

    #[test]
    fn test_request_from_frame() {
        let request = CommandRequest::from_frame(&command("GET_CFG", 4)).unwrap();
        assert_eq!(request.command, ControllerCommand::GetConfig);
        assert_eq!(request.session_index, Some(4));
        assert_eq!(request.payload, vec!["payload".to_string()]);

        let bad_index = Frame::new("GET_CFG").with_field("x");
        assert_eq!(CommandRequest::from_frame(&bad_index).unwrap().session_index, None);

        assert!(CommandRequest::from_frame(&Frame::new("ACK_LOG")).is_err());
    }

    #[tokio::test]
    async fn test_get_config_dispatched_and_closed() {
        let (recorder, collab, ctx) = setup();
        let (device, mut controller) = pair().await;

        let outcome = dispatch(command("GET_CFG", 1), device, &ctx, &collab, IO).await;
        assert_eq!(outcome, DispatchOutcome::Handled(ControllerCommand::GetConfig));
        assert_eq!(recorder.commands(), vec![ControllerCommand::GetConfig]);
        // Core closed the connection
        assert!(controller.read_frame(IO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_config_requires_admin() {
        let (recorder, collab, ctx) = setup();
        let (device, mut controller) = pair().await;

        let outcome = dispatch(command("SET_CFG", 1), device, &ctx, &collab, IO).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Rejected(ControllerCommand::SetConfig, ReplyCode::NoPrivilege)
        );
        assert!(recorder.commands().is_empty());

        let reply = controller.expect_frame(IO).await.unwrap();
        assert_eq!(reply.header(), "RPL_CFG");
        assert_eq!(reply.field(0), Some("2"));

        let (device, _controller) = pair().await;
        let outcome = dispatch(command("DEF_CFG", 0), device, &ctx, &collab, IO).await;
        assert_eq!(outcome, DispatchOutcome::Handled(ControllerCommand::DefaultConfig));
    }

    #[tokio::test]
    async fn test_inactive_session_drops() {
        let (recorder, collab, ctx) = setup();
        ctx.deactivate();

        for token in ["GET_CFG", "SET_CFG", "DEF_CFG", "SET_CMD"] {
            let (device, _controller) = pair().await;
            let outcome = dispatch(command(token, 0), device, &ctx, &collab, IO).await;
            assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::InvalidSession));
        }
        assert!(recorder.commands().is_empty());
        assert_eq!(ctx.link().metrics().snapshot().frames_dropped, 4);
    }

    #[tokio::test]
    async fn test_unknown_user_session_drops() {
        let (recorder, collab, ctx) = setup();
        let (device, _controller) = pair().await;

        let outcome = dispatch(command("GET_CFG", 9), device, &ctx, &collab, IO).await;
        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::InvalidSession));
        assert!(recorder.commands().is_empty());
    }

    #[tokio::test]
    async fn test_file_transfer_invalid_session_reply() {
        let (recorder, collab, ctx) = setup();
        let (device, mut controller) = pair().await;

        let outcome = dispatch(command("REQ_FTS", 7), device, &ctx, &collab, IO).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Rejected(ControllerCommand::FileTransfer, ReplyCode::InvalidSession)
        );
        let reply = controller.expect_frame(IO).await.unwrap();
        assert_eq!(reply.header(), "RPL_FTS");
        assert_eq!(reply.field(0), Some("1"));
        assert!(recorder.commands().is_empty());
    }

    #[tokio::test]
    async fn test_owned_handler_receives_stream() {
        let (recorder, collab, ctx) = setup();
        let (device, _controller) = pair().await;

        let outcome = dispatch(command("SET_CMD", 1), device, &ctx, &collab, IO).await;
        assert_eq!(outcome, DispatchOutcome::HandedOff(ControllerCommand::SetCommand));

        for _ in 0..50 {
            if !recorder.commands().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recorder.commands(), vec![ControllerCommand::SetCommand]);
    }

    #[tokio::test]
    async fn test_door_command_skips_session_check() {
        let (recorder, collab, ctx) = setup();
        ctx.deactivate();
        let (device, _controller) = pair().await;

        let outcome = dispatch(command("DOR_CMD", 200), device, &ctx, &collab, IO).await;
        assert_eq!(outcome, DispatchOutcome::Handled(ControllerCommand::DoorCommand));
        assert_eq!(recorder.commands(), vec![ControllerCommand::DoorCommand]);
    }

    #[tokio::test]
    async fn test_unknown_token_ignored() {
        let (recorder, collab, ctx) = setup();
        let (device, _controller) = pair().await;

        let outcome = dispatch(Frame::new("ACK_POL").with_field(0), device, &ctx, &collab, IO).await;
        assert_eq!(outcome, DispatchOutcome::Dropped(DropReason::UnknownCommand));
        assert!(recorder.commands().is_empty());
    }
}
