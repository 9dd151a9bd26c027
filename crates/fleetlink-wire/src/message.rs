//! Typed builders for device commands and parsers for controller acknowledgements

use crate::frame::{Frame, WireError};
use crate::header::{ControllerReply, DeviceCommand};
use fleetlink_core::types::LiveEvent;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status code carried as the first field of every acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseCode {
    Success,
    Fail,
    Refused,
    InProgress,
}

impl ResponseCode {
    pub fn code(&self) -> u8 {
        match self {
            ResponseCode::Success => 0,
            ResponseCode::Fail => 1,
            ResponseCode::Refused => 2,
            ResponseCode::InProgress => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ResponseCode::Success),
            1 => Some(ResponseCode::Fail),
            2 => Some(ResponseCode::Refused),
            3 => Some(ResponseCode::InProgress),
            _ => None,
        }
    }
}

/// Status code of the device's replies on worker connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyCode {
    Success,
    InvalidSession,
    NoPrivilege,
    InvalidMessage,
}

impl ReplyCode {
    pub fn code(&self) -> u8 {
        match self {
            ReplyCode::Success => 0,
            ReplyCode::InvalidSession => 1,
            ReplyCode::NoPrivilege => 2,
            ReplyCode::InvalidMessage => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ReplyCode::Success),
            1 => Some(ReplyCode::InvalidSession),
            2 => Some(ReplyCode::NoPrivilege),
            3 => Some(ReplyCode::InvalidMessage),
            _ => None,
        }
    }
}

/// Session parameters granted by a successful login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Controller-assigned device id
    pub device_id: u32,
    /// Receive timeout for long-polls and worker reads
    pub poll_duration: Duration,
    /// Pause between long-polls (zero = poll back-to-back)
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success(LoginResponse),
    /// Non-transient rejection; the link must not retry on its own
    Refused,
    /// Controller is still provisioning the device
    InProgress,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Number of worker connections the controller wants opened
    Pending(u8),
    Refused,
    Failed,
}

pub fn login() -> Frame {
    Frame::new(DeviceCommand::Login.token())
}

pub fn send_device_id(device_id: u32) -> Frame {
    Frame::new(DeviceCommand::SendDeviceId.token()).with_field(device_id)
}

pub fn long_poll(device_id: u32) -> Frame {
    Frame::new(DeviceCommand::LongPoll.token()).with_field(device_id)
}

/// Renders one live event. Separator bytes in free text are replaced so the
/// frame stays well formed.
pub fn live_event(device_id: u32, event: &LiveEvent) -> Frame {
    Frame::new(DeviceCommand::LiveEvent.token())
        .with_field(device_id)
        .with_field(event.occurred_at.timestamp())
        .with_field(sanitize(&event.kind))
        .with_field(sanitize(&event.source))
        .with_field(sanitize(&event.detail))
}

pub fn config_reply(code: ReplyCode) -> Frame {
    Frame::new(DeviceCommand::ConfigReply.token()).with_field(code.code())
}

pub fn transfer_reply(code: ReplyCode) -> Frame {
    Frame::new(DeviceCommand::TransferReply.token()).with_field(code.code())
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

fn expect_reply(frame: &Frame, expected: ControllerReply) -> Result<ResponseCode, WireError> {
    if frame.header() != expected.token() {
        return Err(WireError::UnexpectedReply {
            expected: expected.token(),
            actual: frame.header().to_string(),
        });
    }

    let code: u8 = frame.parse_field(0, "response_code")?;
    ResponseCode::from_code(code).ok_or_else(|| WireError::InvalidField {
        field: "response_code",
        reason: format!("unknown code {}", code),
    })
}

/// Parses an `ACK_LOG` frame.
pub fn parse_login_reply(frame: &Frame) -> Result<LoginOutcome, WireError> {
    match expect_reply(frame, ControllerReply::LoginAck)? {
        ResponseCode::Success => {
            let device_id = frame.parse_field(1, "device_id")?;
            let poll_duration: u32 = frame.parse_field(2, "poll_duration")?;
            let poll_interval: u32 = frame.parse_field(3, "poll_interval")?;
            if poll_duration == 0 {
                return Err(WireError::InvalidField {
                    field: "poll_duration",
                    reason: "must be at least one second".to_string(),
                });
            }
            Ok(LoginOutcome::Success(LoginResponse {
                device_id,
                poll_duration: Duration::from_secs(poll_duration.into()),
                poll_interval: Duration::from_secs(poll_interval.into()),
            }))
        }
        ResponseCode::Refused => Ok(LoginOutcome::Refused),
        ResponseCode::InProgress => Ok(LoginOutcome::InProgress),
        ResponseCode::Fail => Ok(LoginOutcome::Failed),
    }
}

/// Parses an `ACK_POL` frame.
pub fn parse_poll_reply(frame: &Frame) -> Result<PollOutcome, WireError> {
    match expect_reply(frame, ControllerReply::PollAck)? {
        ResponseCode::Success => Ok(PollOutcome::Pending(
            frame.parse_field(1, "ports_to_open")?,
        )),
        ResponseCode::Refused => Ok(PollOutcome::Refused),
        ResponseCode::Fail | ResponseCode::InProgress => Ok(PollOutcome::Failed),
    }
}
