//! Framed TCP connections to the controller

use anyhow::{anyhow, Context, Result};
use bytes::BytesMut;
use fleetlink_wire::{Frame, FrameCodec};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, instrument};

/// Opens a TCP connection with a per-attempt timeout.
#[instrument(skip(connect_timeout, keepalive))]
pub async fn connect(
    endpoint: &str,
    connect_timeout: Duration,
    keepalive: Option<Duration>,
) -> Result<ControllerStream> {
    let stream = timeout(connect_timeout, TcpStream::connect(endpoint))
        .await
        .context("Connection timeout")?
        .with_context(|| format!("Failed to connect to {}", endpoint))?;

    configure_socket(&stream, keepalive)?;
    debug!("Connected to {}", endpoint);

    Ok(ControllerStream::new(stream))
}

fn configure_socket(stream: &TcpStream, keepalive: Option<Duration>) -> Result<()> {
    stream
        .set_nodelay(true)
        .context("Failed to set TCP_NODELAY")?;

    if let Some(interval) = keepalive {
        let keepalive = socket2::TcpKeepalive::new().with_time(interval);
        socket2::SockRef::from(stream)
            .set_tcp_keepalive(&keepalive)
            .context("Failed to set TCP keepalive")?;
    }

    Ok(())
}

/// A controller connection speaking the framed wire format.
#[derive(Debug)]
pub struct ControllerStream {
    stream: TcpStream,
    buffer: BytesMut,
    codec: FrameCodec,
}

impl ControllerStream {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(fleetlink_wire::MAX_FRAME_SIZE),
            codec: FrameCodec::new(),
        }
    }

    /// Local IP address of the socket.
    pub fn local_ip(&self) -> Option<String> {
        self.stream.local_addr().ok().map(|addr| addr.ip().to_string())
    }

    /// Reads the next frame. Returns `Ok(None)` on a clean disconnect.
    pub async fn read_frame(&mut self, read_timeout: Duration) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(frame));
            }

            let read = timeout(read_timeout, self.stream.read_buf(&mut self.buffer))
                .await
                .context("Read timeout")?
                .context("Read error")?;

            if read == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(anyhow!("Connection closed with incomplete frame"));
            }
        }
    }

    /// Reads one frame, treating a disconnect as an error.
    pub async fn expect_frame(&mut self, read_timeout: Duration) -> Result<Frame> {
        self.read_frame(read_timeout)
            .await?
            .ok_or_else(|| anyhow!("Connection closed by controller"))
    }

    pub async fn write_frame(&mut self, frame: &Frame, write_timeout: Duration) -> Result<()> {
        let mut out = BytesMut::with_capacity(frame.encoded_len());
        self.codec.encode(frame, &mut out)?;

        timeout(write_timeout, self.stream.write_all(&out))
            .await
            .context("Write timeout")?
            .context("Write error")?;
        self.stream.flush().await.context("Flush error")?;

        Ok(())
    }

    /// Drops buffered bytes and whatever the socket has already received
    /// without waiting for more. Returns the number of bytes dropped.
    pub fn discard_pending(&mut self) -> Result<usize> {
        let mut dropped = self.buffer.len();
        self.buffer.clear();

        let mut scratch = [0u8; 1024];
        loop {
            match self.stream.try_read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => dropped += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("Read error"),
            }
        }

        Ok(dropped)
    }

    /// Raw socket access for handlers that speak their own payload format.
    pub fn get_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Bytes read past the last decoded frame.
    pub fn read_buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "Socket shutdown failed");
        }
    }
}
