//! Transport abstraction and MQTT framing on top of it.
//!
//! TCP and WebSocket connections both end up as a [`TransportReader`] and a
//! [`TransportWriter`], so the connection handler does not care which one it
//! is driving.

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use log::trace;
use picobroker_core::Packet;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, ServerError};

/// Receiving half of a client transport.
#[async_trait]
pub trait TransportReader: Send + 'static {
    /// Appends whatever arrived next to `buffer`. Returns 0 once the peer has
    /// closed the transport.
    async fn read_into(&mut self, buffer: &mut BytesMut) -> Result<usize>;
}

/// Sending half of a client transport.
#[async_trait]
pub trait TransportWriter: Send + 'static {
    /// Writes one or more encoded packets.
    async fn write_frame(&mut self, frame: Bytes) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Reader over a raw byte stream such as a TCP read half.
pub struct StreamReader<R> {
    inner: R,
}

impl<R> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R> TransportReader for StreamReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn read_into(&mut self, buffer: &mut BytesMut) -> Result<usize> {
        Ok(self.inner.read_buf(buffer).await?)
    }
}

/// Writer over a raw byte stream such as a TCP write half.
pub struct StreamWriter<W> {
    inner: W,
}

impl<W> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W> TransportWriter for StreamWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write_frame(&mut self, frame: Bytes) -> Result<()> {
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(self.inner.shutdown().await?)
    }
}

/// Reads the next complete packet, pulling more bytes from `reader` as
/// needed. `Ok(None)` means the peer closed the transport between packets.
pub async fn read_packet<R>(reader: &mut R, buffer: &mut BytesMut, max_packet_size: usize) -> Result<Option<Packet>>
where
    R: TransportReader + ?Sized,
{
    loop {
        if let Some((packet, consumed)) = Packet::decode(&buffer[..], max_packet_size)? {
            buffer.advance(consumed);
            trace!("Decoded {} ({} bytes)", packet.packet_type(), consumed);
            return Ok(Some(packet));
        }
        if reader.read_into(buffer).await? == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(ServerError::TruncatedPacket {
                buffered: buffer.len(),
            });
        }
    }
}

/// Encodes packets back to back into a single frame.
pub fn encode_frame(packets: &[Packet]) -> Result<Bytes> {
    let mut buffer = BytesMut::new();
    for packet in packets {
        packet.encode(&mut buffer)?;
    }
    Ok(buffer.freeze())
}
