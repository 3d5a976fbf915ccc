//! MQTT protocol encoding, decoding and stream framing.
//!
//! [`Framer`] reassembles complete control packets from arbitrary byte
//! chunks using the remaining-length varint; [`v4`] decodes their bodies.

pub mod codec;
pub mod v4;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, Result};
use crate::varint::{self, VarIntError};

pub use v4::Packet;

/// Maximum packet size (1MB default).
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// Protocol name for MQTT.
pub const PROTOCOL_NAME: &[u8] = b"MQTT";

/// Protocol level for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// One control packet as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Fixed header byte: packet type and flags.
    pub header: u8,
    /// Variable header and payload.
    pub body: Bytes,
}

/// Reassembles frames from a byte stream.
#[derive(Debug)]
pub struct Framer {
    buf: BytesMut,
    max_packet_size: usize,
}

impl Framer {
    /// Create a framer rejecting packets larger than `max_packet_size`
    /// (fixed header included).
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_packet_size,
        }
    }

    /// Append bytes received from the transport.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Take the next complete frame, `Ok(None)` if more bytes are needed.
    ///
    /// A malformed remaining length or an oversized packet leaves the stream
    /// desynchronized; the caller should drop the connection.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut cursor = 1;
        let remaining = match varint::decode(&self.buf, &mut cursor) {
            Ok(len) => len as usize,
            Err(VarIntError::Incomplete) => return Ok(None),
            Err(VarIntError::Malformed) => return Err(Error::MalformedVarInt),
        };

        let total = cursor + remaining;
        if total > self.max_packet_size {
            return Err(Error::PacketTooLarge {
                size: total,
                max: self.max_packet_size,
            });
        }
        if self.buf.len() < total {
            self.buf.reserve(total - self.buf.len());
            return Ok(None);
        }

        let mut packet = self.buf.split_to(total);
        let header = packet[0];
        packet.advance(cursor);

        Ok(Some(Frame {
            header,
            body: packet.freeze(),
        }))
    }
}

/// Read the next frame from `reader`, buffering through `framer`.
///
/// End of stream is reported as [`Error::ConnectionClosed`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, framer: &mut Framer) -> Result<Frame> {
    loop {
        if let Some(frame) = framer.next_frame()? {
            return Ok(frame);
        }

        let mut tmp = [0u8; 4096];
        let n = reader.read(&mut tmp).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        trace!(bytes = n, "read chunk");
        framer.extend(&tmp[..n]);
    }
}

/// Read and decode the next packet from `reader`.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R, framer: &mut Framer) -> Result<Packet> {
    let frame = read_frame(reader, framer).await?;
    Packet::decode(frame)
}

/// Encode and write a single packet.
pub async fn write_packet<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, packet: &Packet) -> Result<()> {
    let mut buf = BytesMut::new();
    packet.write(&mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
