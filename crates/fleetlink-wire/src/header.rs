//! Header token tables, one per direction
//!
//! Lookups walk a fixed, ordered table. A token that is not in the table for
//! the current direction is reported to the caller instead of panicking so the
//! session can discard the message and carry on.

use std::fmt;

/// Commands the device sends to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCommand {
    /// Login on the control-plane connection (no body)
    Login,
    /// Identify a worker connection (body: device id)
    SendDeviceId,
    /// Long-poll request (body: device id)
    LongPoll,
    /// Live event forwarded on an event connection
    LiveEvent,
    /// Negative reply to a configuration command
    ConfigReply,
    /// Negative reply to a file-transfer request
    TransferReply,
}

impl DeviceCommand {
    pub fn token(&self) -> &'static str {
        match self {
            DeviceCommand::Login => "REQ_LOG",
            DeviceCommand::SendDeviceId => "SND_DID",
            DeviceCommand::LongPoll => "REQ_POL",
            DeviceCommand::LiveEvent => "SND_EVT",
            DeviceCommand::ConfigReply => "RPL_CFG",
            DeviceCommand::TransferReply => "RPL_FTS",
        }
    }
}

/// Acknowledgements the device receives on the control-plane connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerReply {
    LoginAck,
    PollAck,
}

impl ControllerReply {
    /// Lookup order of the acknowledgement table.
    pub const ALL: [ControllerReply; 2] = [ControllerReply::LoginAck, ControllerReply::PollAck];

    pub fn token(&self) -> &'static str {
        match self {
            ControllerReply::LoginAck => "ACK_LOG",
            ControllerReply::PollAck => "ACK_POL",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|reply| reply.token() == token)
    }
}

impl fmt::Display for ControllerReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Commands the controller issues over worker connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerCommand {
    /// Read configuration records
    GetConfig,
    /// Write configuration records
    SetConfig,
    /// Restore configuration defaults
    DefaultConfig,
    /// Generic device command
    SetCommand,
    /// File-transfer request
    FileTransfer,
    /// Door-integration command
    DoorCommand,
}

impl ControllerCommand {
    /// Lookup order of the command table.
    pub const ALL: [ControllerCommand; 6] = [
        ControllerCommand::GetConfig,
        ControllerCommand::SetConfig,
        ControllerCommand::DefaultConfig,
        ControllerCommand::SetCommand,
        ControllerCommand::FileTransfer,
        ControllerCommand::DoorCommand,
    ];

    pub fn token(&self) -> &'static str {
        match self {
            ControllerCommand::GetConfig => "GET_CFG",
            ControllerCommand::SetConfig => "SET_CFG",
            ControllerCommand::DefaultConfig => "DEF_CFG",
            ControllerCommand::SetCommand => "SET_CMD",
            ControllerCommand::FileTransfer => "REQ_FTS",
            ControllerCommand::DoorCommand => "DOR_CMD",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.token() == token)
    }

    /// Position in the command table.
    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|command| command == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for ControllerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
