//! Framing: start/end markers, field separators and the stream codec

use crate::header::{ControllerCommand, ControllerReply};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::str::FromStr;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

/// Start-of-message marker
pub const SOM: u8 = 0x01;
/// End-of-message marker
pub const EOM: u8 = 0x04;
/// Field separator
pub const FS: u8 = 0x1E;

/// Maximum frame size including markers (16 KiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Invalid syntax: {0}")]
    InvalidSyntax(String),

    #[error("Invalid message: unrecognized header token '{0}'")]
    InvalidMessage(String),

    #[error("Unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        expected: &'static str,
        actual: String,
    },

    #[error("Frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("Invalid value for field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WireError {
    fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// One protocol message: a header token followed by text fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: String,
    fields: Vec<String>,
}

impl Frame {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            fields: Vec::new(),
        }
    }

    /// Appends a field, builder style.
    pub fn with_field(mut self, value: impl ToString) -> Self {
        self.fields.push(value.to_string());
        self
    }

    pub fn push_field(&mut self, value: impl ToString) {
        self.fields.push(value.to_string());
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// Parses a field into `T`, naming it in the error when missing or malformed.
    pub fn parse_field<T: FromStr>(&self, index: usize, name: &'static str) -> Result<T, WireError> {
        let raw = self
            .field(index)
            .ok_or_else(|| WireError::field(name, "missing"))?;
        raw.trim()
            .parse()
            .map_err(|_| WireError::field(name, format!("cannot parse '{}'", raw)))
    }

    /// Looks the header up in the acknowledgement table.
    pub fn reply_kind(&self) -> Result<ControllerReply, WireError> {
        ControllerReply::from_token(&self.header)
            .ok_or_else(|| WireError::InvalidMessage(self.header.clone()))
    }

    /// Looks the header up in the controller command table.
    pub fn command_kind(&self) -> Result<ControllerCommand, WireError> {
        ControllerCommand::from_token(&self.header)
            .ok_or_else(|| WireError::InvalidMessage(self.header.clone()))
    }

    /// Size of the encoded frame including markers.
    pub fn encoded_len(&self) -> usize {
        let fields: usize = self.fields.iter().map(|f| f.len() + 1).sum();
        2 + self.header.len() + 1 + fields
    }

    /// Writes the framed representation into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), WireError> {
        if self.header.is_empty() {
            return Err(WireError::InvalidSyntax("empty header token".to_string()));
        }
        check_text("header", &self.header)?;
        for field in &self.fields {
            check_text("field", field)?;
        }

        let len = self.encoded_len();
        if len > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge(len));
        }

        dst.reserve(len);
        dst.put_u8(SOM);
        dst.put_slice(self.header.as_bytes());
        dst.put_u8(FS);
        for field in &self.fields {
            dst.put_slice(field.as_bytes());
            dst.put_u8(FS);
        }
        dst.put_u8(EOM);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Parses one complete frame, markers included.
    pub fn parse(data: &[u8]) -> Result<Frame, WireError> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(WireError::FrameTooLarge(data.len()));
        }
        match (data.first(), data.last()) {
            (Some(&SOM), Some(&EOM)) if data.len() >= 2 => Self::parse_body(&data[1..data.len() - 1]),
            _ => Err(WireError::InvalidSyntax(
                "frame must start with SOM and end with EOM".to_string(),
            )),
        }
    }

    /// Parses the bytes between the start and end markers.
    pub fn parse_body(body: &[u8]) -> Result<Frame, WireError> {
        if body.contains(&SOM) || body.contains(&EOM) {
            return Err(WireError::InvalidSyntax("nested frame marker".to_string()));
        }

        let text = std::str::from_utf8(body)
            .map_err(|e| WireError::InvalidSyntax(format!("invalid UTF-8: {}", e)))?;

        // Every field is FS-terminated, so a well-formed body ends with FS.
        let text = text.strip_suffix(FS as char).unwrap_or(text);
        let mut parts = text.split(FS as char);

        let header = parts.next().unwrap_or_default();
        if header.is_empty() || !header.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(WireError::InvalidSyntax(format!(
                "malformed header token '{}'",
                header
            )));
        }

        Ok(Frame {
            header: header.to_string(),
            fields: parts.map(str::to_string).collect(),
        })
    }
}

fn check_text(what: &'static str, value: &str) -> Result<(), WireError> {
    if value.bytes().any(|b| b == SOM || b == EOM || b == FS) {
        return Err(WireError::field(what, "contains a frame marker"));
    }
    Ok(())
}

/// Stream codec for [`Frame`]s.
///
/// Bytes before a start marker are discarded so the reader can resynchronise
/// after garbage; an unterminated frame growing past [`MAX_FRAME_SIZE`] is an
/// error.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        loop {
            let Some(end) = src.iter().position(|&b| b == EOM) else {
                match src.iter().position(|&b| b == SOM) {
                    Some(start) => src.advance(start),
                    None => src.clear(),
                }
                if src.len() >= MAX_FRAME_SIZE {
                    return Err(WireError::FrameTooLarge(src.len()));
                }
                return Ok(None);
            };

            // Start from the last SOM before the terminator; anything earlier
            // belongs to a truncated frame.
            let Some(start) = src[..end].iter().rposition(|&b| b == SOM) else {
                warn!(discarded = end + 1, "End marker without start marker, discarding");
                src.advance(end + 1);
                continue;
            };
            if start > 0 {
                warn!(discarded = start, "Discarding bytes before start marker");
                src.advance(start);
            }

            let frame_len = end - start + 1;
            if frame_len > MAX_FRAME_SIZE {
                src.advance(frame_len);
                return Err(WireError::FrameTooLarge(frame_len));
            }

            let raw = src.split_to(frame_len);
            return Frame::parse_body(&raw[1..frame_len - 1]).map(Some);
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), WireError> {
        item.encode(dst)
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: &Frame, dst: &mut BytesMut) -> Result<(), WireError> {
        item.encode(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(parts: &[&str]) -> Vec<u8> {
        let mut out = vec![SOM];
        for part in parts {
            out.extend_from_slice(part.as_bytes());
            out.push(FS);
        }
        out.push(EOM);
        out
    }

    #[test]
    fn test_encode_layout() {
        let frame = Frame::new("REQ_POL").with_field(42);
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(&bytes[..], &raw(&["REQ_POL", "42"])[..]);
        assert_eq!(bytes.len(), frame.encoded_len());
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let frame = Frame::new("SET_CFG")
            .with_field(3)
            .with_field("")
            .with_field("camera=1,name=Lobby");
        let bytes = frame.to_bytes().unwrap();
        let decoded = Frame::parse(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.field(1), Some(""));
    }

    #[test]
    fn test_parse_without_trailing_separator() {
        let mut data = vec![SOM];
        data.extend_from_slice(b"ACK_POL\x1e0\x1e2");
        data.push(EOM);
        let frame = Frame::parse(&data).unwrap();
        assert_eq!(frame.header(), "ACK_POL");
        assert_eq!(frame.fields(), &["0".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_parse_rejects_missing_markers() {
        assert!(matches!(
            Frame::parse(b"ACK_LOG\x1e0\x1e"),
            Err(WireError::InvalidSyntax(_))
        ));
        assert!(matches!(
            Frame::parse(&[SOM, FS, EOM]),
            Err(WireError::InvalidSyntax(_))
        ));
    }

    #[test]
    fn test_unknown_token_is_recoverable() {
        let frame = Frame::parse(&raw(&["XYZ_ABC", "1"])).unwrap();
        assert!(matches!(frame.reply_kind(), Err(WireError::InvalidMessage(t)) if t == "XYZ_ABC"));
        assert!(frame.command_kind().is_err());
    }

    #[test]
    fn test_encode_rejects_markers_in_fields() {
        let frame = Frame::new("SET_CFG").with_field("a\u{1e}b");
        assert!(matches!(
            frame.to_bytes(),
            Err(WireError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let frame = Frame::new("SET_CFG").with_field("x".repeat(MAX_FRAME_SIZE));
        assert!(matches!(frame.to_bytes(), Err(WireError::FrameTooLarge(_))));
    }

    #[test]
    fn test_parse_field() {
        let frame = Frame::new("ACK_LOG").with_field("0").with_field(" 17 ");
        assert_eq!(frame.parse_field::<u32>(1, "device_id").unwrap(), 17);
        assert!(frame.parse_field::<u32>(2, "poll_duration").is_err());
    }

    #[test]
    fn test_decoder_partial_then_complete() {
        let mut codec = FrameCodec::new();
        let data = raw(&["ACK_LOG", "0", "7", "5", "2"]);
        let mut buf = BytesMut::from(&data[..5]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&data[5..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header(), "ACK_LOG");
        assert_eq!(frame.fields().len(), 4);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_multiple_frames() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&raw(&["ACK_POL", "0", "1"]));
        buf.extend_from_slice(&raw(&["ACK_POL", "0", "2"]));

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.field(1), Some("1"));
        assert_eq!(second.field(1), Some("2"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decoder_resyncs_after_garbage() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"noise");
        buf.extend_from_slice(&[SOM]);
        buf.extend_from_slice(b"TRUNC");
        buf.extend_from_slice(&raw(&["ACK_POL", "0", "4"]));

        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header(), "ACK_POL");
        assert_eq!(frame.field(1), Some("4"));
    }

    #[test]
    fn test_decoder_discards_garbage_without_start() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"garbage bytes"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_frame_too_large() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u8(SOM);
        buf.extend_from_slice(&vec![b'A'; MAX_FRAME_SIZE]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WireError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_encoder_trait() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Frame::new("REQ_LOG"), &mut buf).unwrap();
        assert_eq!(&buf[..], &raw(&["REQ_LOG"])[..]);
    }
}
