//! Frame codec for the device/controller protocol
//!
//! Every message on the wire is one frame:
//!
//! ```text
//! SOM <header-token> FS <field> FS <field> FS ... EOM
//! ```
//!
//! `SOM` (0x01), `FS` (0x1E) and `EOM` (0x04) are single bytes and every field,
//! the header token included, is terminated by `FS`.
//!
//! # Features
//!
//! - `tokio_util` [`Decoder`](tokio_util::codec::Decoder) /
//!   [`Encoder`](tokio_util::codec::Encoder) implementation with resync on garbage
//!   and a 16 KiB frame limit
//! - Direction-specific header token tables
//! - Typed builders for the commands the device issues and parsers for the
//!   acknowledgements it receives
//!
//! # Example
//!
//! ```rust
//! use fleetlink_wire::{Frame, DeviceCommand, ControllerReply};
//!
//! let poll = fleetlink_wire::message::long_poll(42);
//! assert_eq!(poll.header(), DeviceCommand::LongPoll.token());
//!
//! let reply = Frame::parse(b"\x01ACK_POL\x1e0\x1e3\x1e\x04").unwrap();
//! assert_eq!(reply.reply_kind().unwrap(), ControllerReply::PollAck);
//! ```

pub mod frame;
pub mod header;
pub mod message;

pub use frame::{Frame, FrameCodec, WireError, EOM, FS, MAX_FRAME_SIZE, SOM};
pub use header::{ControllerCommand, ControllerReply, DeviceCommand};
pub use message::{LoginOutcome, LoginResponse, PollOutcome, ReplyCode, ResponseCode};
