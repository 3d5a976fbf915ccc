//! Variable byte integer codec (MQTT "Remaining Length").
//!
//! Each byte carries 7 data bits, least significant group first. The high
//! bit is set when another byte follows. At most 4 bytes are allowed, so the
//! largest encodable value is 268 435 455.

use std::ops::Deref;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};

/// Largest value a variable byte integer can hold (2^28 - 1).
pub const MAX_VALUE: u32 = 0x0FFF_FFFF;

/// Maximum number of bytes in an encoding.
pub const MAX_LEN: usize = 4;

const CONTINUATION: u8 = 0x80;
const DATA_BITS: u8 = 0x7F;

/// Decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarIntError {
    /// Input ended before the terminating byte. Not an error of the stream:
    /// buffer more bytes and retry from the same cursor.
    Incomplete,
    /// More than 4 bytes carry the continuation bit.
    Malformed,
}

impl From<VarIntError> for Error {
    fn from(_: VarIntError) -> Self {
        Error::MalformedVarInt
    }
}

/// An encoded variable byte integer (1 to 4 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoded {
    bytes: [u8; MAX_LEN],
    len: u8,
}

impl Deref for Encoded {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// Encode `value`, `None` if it exceeds [`MAX_VALUE`].
pub fn encode(mut value: u32) -> Option<Encoded> {
    if value > MAX_VALUE {
        return None;
    }

    let mut out = Encoded { bytes: [0; MAX_LEN], len: 0 };
    while value > DATA_BITS as u32 {
        out.bytes[out.len as usize] = (value as u8 & DATA_BITS) | CONTINUATION;
        out.len += 1;
        value >>= 7;
    }
    out.bytes[out.len as usize] = value as u8;
    out.len += 1;

    Some(out)
}

/// Append the encoding of `value` to `buf`.
pub fn put(buf: &mut BytesMut, value: u32) -> Result<()> {
    let encoded = encode(value).ok_or(Error::MalformedVarInt)?;
    buf.put_slice(&encoded);
    Ok(())
}

/// Number of bytes needed to encode `value` (values above [`MAX_VALUE`]
/// report [`MAX_LEN`]).
pub const fn encoded_len(value: u32) -> usize {
    if value < 128 {
        1
    } else if value < 128 * 128 {
        2
    } else if value < 128 * 128 * 128 {
        3
    } else {
        4
    }
}

/// Decode a variable byte integer starting at `*cursor`.
///
/// On success the cursor points just past the terminating byte. On
/// [`VarIntError::Malformed`] it points past the offending fifth byte. On
/// [`VarIntError::Incomplete`] it is left where it was.
pub fn decode(buf: &[u8], cursor: &mut usize) -> std::result::Result<u32, VarIntError> {
    let start = *cursor;
    let mut pos = start;
    let mut value = 0u32;
    let mut multiplier = 1u32;

    while let Some(&byte) = buf.get(pos) {
        pos += 1;
        if pos - start > MAX_LEN {
            *cursor = pos;
            return Err(VarIntError::Malformed);
        }

        value += (byte & DATA_BITS) as u32 * multiplier;
        if byte & CONTINUATION == 0 {
            *cursor = pos;
            return Ok(value);
        }
        multiplier *= 128;
    }

    Err(VarIntError::Incomplete)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries() {
        let cases: [(u32, &[u8]); 8] = [
            (0, &[0x00]),
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xFF, 0x7F]),
            (16_384, &[0x80, 0x80, 0x01]),
            (2_097_151, &[0xFF, 0xFF, 0x7F]),
            (2_097_152, &[0x80, 0x80, 0x80, 0x01]),
            (MAX_VALUE, &[0xFF, 0xFF, 0xFF, 0x7F]),
        ];

        for (value, bytes) in cases {
            let encoded = encode(value).unwrap();
            assert_eq!(&*encoded, bytes, "encode {}", value);
            assert_eq!(encoded.len(), encoded_len(value));

            let mut cursor = 0;
            assert_eq!(decode(bytes, &mut cursor), Ok(value));
            assert_eq!(cursor, bytes.len());
        }
    }

    #[test]
    fn test_round_trip_sampled() {
        let mut value = 0u32;
        while value <= MAX_VALUE {
            let encoded = encode(value).unwrap();
            let mut cursor = 0;
            assert_eq!(decode(&encoded, &mut cursor), Ok(value));
            value += 997;
        }
    }

    #[test]
    fn test_encode_out_of_range() {
        assert!(encode(MAX_VALUE + 1).is_none());
        assert!(encode(u32::MAX).is_none());

        let mut buf = BytesMut::new();
        assert!(matches!(put(&mut buf, MAX_VALUE + 1), Err(Error::MalformedVarInt)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_five_bytes_is_malformed() {
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x42];
        let mut cursor = 0;
        assert_eq!(decode(&bytes, &mut cursor), Err(VarIntError::Malformed));
        assert_eq!(cursor, 5);
    }

    #[test]
    fn test_incomplete_keeps_cursor() {
        let bytes = [0x10, 0xFF, 0xFF];
        let mut cursor = 1;
        assert_eq!(decode(&bytes, &mut cursor), Err(VarIntError::Incomplete));
        assert_eq!(cursor, 1);

        let mut cursor = 3;
        assert_eq!(decode(&bytes, &mut cursor), Err(VarIntError::Incomplete));
        assert_eq!(cursor, 3);
    }

    #[test]
    fn test_decode_at_offset() {
        let bytes = [0x30, 0x80, 0x01, 0xAA];
        let mut cursor = 1;
        assert_eq!(decode(&bytes, &mut cursor), Ok(128));
        assert_eq!(cursor, 3);
    }
}
