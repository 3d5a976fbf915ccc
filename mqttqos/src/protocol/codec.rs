//! MQTT encoding primitives.
//!
//! Readers consume from a [`Bytes`] cursor and fail with
//! [`Error::Protocol`] when the body is shorter than its fields claim.
//! Writers append to a [`BytesMut`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::varint;

/// MQTT control packet type (high nibble of the fixed header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            _ => return None,
        })
    }

    /// Flags the fixed header must carry (PUBLISH flags are variable).
    pub fn required_flags(self) -> Option<u8> {
        match self {
            PacketType::Publish => None,
            PacketType::PubRel | PacketType::Subscribe | PacketType::Unsubscribe => Some(0x02),
            _ => Some(0x00),
        }
    }
}

fn short(field: &str) -> Error {
    Error::Protocol(format!("packet too short for {}", field))
}

/// Read a 2-byte big-endian u16.
pub fn read_u16(buf: &mut Bytes) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(short("u16"));
    }
    Ok(buf.get_u16())
}

/// Read a single byte.
pub fn read_u8(buf: &mut Bytes) -> Result<u8> {
    if !buf.has_remaining() {
        return Err(short("u8"));
    }
    Ok(buf.get_u8())
}

/// Read binary data (2-byte length prefix + data).
pub fn read_binary(buf: &mut Bytes) -> Result<Bytes> {
    let len = read_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(short("length-prefixed field"));
    }
    Ok(buf.split_to(len))
}

/// Read a UTF-8 string (2-byte length prefix + data).
pub fn read_string(buf: &mut Bytes) -> Result<String> {
    let raw = read_binary(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| Error::Protocol("invalid utf-8 string".to_string()))
}

/// Write binary data (2-byte length prefix + data).
pub fn write_binary(buf: &mut BytesMut, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len())
        .map_err(|_| Error::Protocol(format!("field of {} bytes exceeds 65535", data.len())))?;
    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

/// Write a UTF-8 string (2-byte length prefix + data).
pub fn write_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    write_binary(buf, s.as_bytes())
}

/// Write a fixed header: type and flags byte followed by the remaining
/// length. Returns the header length.
pub fn write_fixed_header(
    buf: &mut BytesMut,
    packet_type: PacketType,
    flags: u8,
    remaining_length: usize,
) -> Result<usize> {
    let remaining = u32::try_from(remaining_length).map_err(|_| Error::MalformedVarInt)?;
    buf.put_u8(((packet_type as u8) << 4) | (flags & 0x0F));
    varint::put(buf, remaining)?;
    Ok(1 + varint::encoded_len(remaining))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "hello").unwrap();
        assert_eq!(buf.len(), 7);

        let mut bytes = buf.freeze();
        assert_eq!(read_string(&mut bytes).unwrap(), "hello");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_short_reads() {
        let mut bytes = Bytes::from_static(&[0x00]);
        assert!(matches!(read_u16(&mut bytes), Err(Error::Protocol(_))));

        let mut bytes = Bytes::from_static(&[0x00, 0x05, b'a', b'b']);
        assert!(matches!(read_binary(&mut bytes), Err(Error::Protocol(_))));

        let mut bytes = Bytes::from_static(&[0x00, 0x02, 0xC3, 0x28]);
        assert!(matches!(read_string(&mut bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_fixed_header() {
        let mut buf = BytesMut::new();
        let len = write_fixed_header(&mut buf, PacketType::PubRel, 0x02, 321).unwrap();
        assert_eq!(len, 3);
        assert_eq!(&buf[..], &[0x62, 0xC1, 0x02]);
    }
}
