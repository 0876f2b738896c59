//! DML message envelope and typed field serialisation.
//!
//! Application frames carry a DML message:
//!
//! ```text
//! [ServiceID(1)] [OrderNumber(1)] [Length(2, LE)] [Body(N)]
//! ```
//!
//! The length field counts the 4-byte header plus the body; bytes beyond it
//! are outer-frame padding and are ignored on decode.
//!
//! Concrete message types implement [`Encode`]/[`Decode`] over their body
//! bytes, typically with the [`FieldWriter`]/[`FieldReader`] helpers which
//! cover the DML field repertoire (`BYT`, `UBYT`, `SHRT`, `USHRT`, `INT`,
//! `UINT`, `GID`, `FLT`, `DBL`, `STR`, `WSTR`).

use bytes::{BufMut, Bytes};

use crate::error::{Result, SpiralError};

/// Size of the message header (service, order, length).
pub const MESSAGE_HEADER_LEN: usize = 4;

/// A raw DML message: the routing key plus an opaque body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DmlMessage {
    pub service_id: u8,
    pub order_number: u8,
    pub body: Bytes,
}

impl DmlMessage {
    /// Create a message from its routing key and body.
    pub fn new(service_id: u8, order_number: u8, body: impl Into<Bytes>) -> Self {
        Self {
            service_id,
            order_number,
            body: body.into(),
        }
    }

    /// Encode the message, header included.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not fit the u16 length field.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let total = MESSAGE_HEADER_LEN + self.body.len();
        if total > u16::MAX as usize {
            return Err(SpiralError::Protocol(format!(
                "dml message too large: {} bytes",
                self.body.len()
            )));
        }

        let mut buf = Vec::with_capacity(total);
        buf.put_u8(self.service_id);
        buf.put_u8(self.order_number);
        buf.put_u16_le(total as u16);
        buf.extend_from_slice(&self.body);
        Ok(buf)
    }

    /// Decode a message from a frame payload.
    ///
    /// Trailing bytes beyond the declared length are ignored.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < MESSAGE_HEADER_LEN {
            return Err(SpiralError::Protocol(format!(
                "dml message too short: {} bytes",
                data.len()
            )));
        }

        let length = u16::from_le_bytes([data[2], data[3]]) as usize;
        if length < MESSAGE_HEADER_LEN || length > data.len() {
            return Err(SpiralError::Protocol(format!(
                "dml length {} exceeds envelope of {} bytes",
                length,
                data.len()
            )));
        }

        Ok(Self {
            service_id: data[0],
            order_number: data[1],
            body: Bytes::copy_from_slice(&data[MESSAGE_HEADER_LEN..length]),
        })
    }
}

/// Capability to serialise a message type into a DML body.
pub trait Encode {
    fn encode(&self) -> Result<Vec<u8>>;
}

/// Capability to construct a message type from a DML body.
pub trait Decode: Sized {
    fn decode(body: &[u8]) -> Result<Self>;
}

/// Sequential little-endian reader over a DML message body.
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
}

macro_rules! read_scalar {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self) -> Result<$ty> {
            const N: usize = std::mem::size_of::<$ty>();
            let bytes = self.take(N)?;
            let mut raw = [0u8; N];
            raw.copy_from_slice(bytes);
            Ok(<$ty>::from_le_bytes(raw))
        }
    };
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(SpiralError::Truncated("dml field".to_string()));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    read_scalar!(read_i8, i8);
    read_scalar!(read_u8, u8);
    read_scalar!(read_i16, i16);
    read_scalar!(read_u16, u16);
    read_scalar!(read_i32, i32);
    read_scalar!(read_u32, u32);
    read_scalar!(read_u64, u64);
    read_scalar!(read_f32, f32);
    read_scalar!(read_f64, f64);

    /// Read a length-prefixed string field.
    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read a wide string field. Wide strings share the length-prefixed
    /// layout of [`read_str`](Self::read_str).
    pub fn read_wstr(&mut self) -> Result<String> {
        self.read_str()
    }

    /// Number of unread bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}

/// Sequential little-endian writer building a DML message body.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

macro_rules! write_scalar {
    ($name:ident, $ty:ty) => {
        pub fn $name(&mut self, value: $ty) {
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    };
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    write_scalar!(write_i8, i8);
    write_scalar!(write_u8, u8);
    write_scalar!(write_i16, i16);
    write_scalar!(write_u16, u16);
    write_scalar!(write_i32, i32);
    write_scalar!(write_u32, u32);
    write_scalar!(write_u64, u64);
    write_scalar!(write_f32, f32);
    write_scalar!(write_f64, f64);

    /// Write a length-prefixed string field.
    ///
    /// # Errors
    ///
    /// Returns an error if the string does not fit the u16 length prefix.
    pub fn write_str(&mut self, value: &str) -> Result<()> {
        if value.len() > u16::MAX as usize {
            return Err(SpiralError::Protocol(format!(
                "string field too long: {} bytes",
                value.len()
            )));
        }
        self.buf.put_u16_le(value.len() as u16);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Write a wide string field.
    pub fn write_wstr(&mut self, value: &str) -> Result<()> {
        self.write_str(value)
    }

    /// Consume the writer and return the body bytes.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrip() {
        let msg = DmlMessage::new(5, 2, b"payload".as_slice());
        let decoded = DmlMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_empty_body_roundtrip() {
        let msg = DmlMessage::new(1, 1, Bytes::new());
        let bytes = msg.encode().unwrap();
        assert_eq!(bytes.len(), MESSAGE_HEADER_LEN);
        assert_eq!(DmlMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_length_field_counts_header() {
        let msg = DmlMessage::new(8, 3, b"abcd".as_slice());
        let bytes = msg.encode().unwrap();
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 8);
    }

    #[test]
    fn test_trailing_padding_ignored() {
        let msg = DmlMessage::new(5, 2, b"data".as_slice());
        let mut bytes = msg.encode().unwrap();
        bytes.extend_from_slice(&[0x00, 0xFF]);

        let decoded = DmlMessage::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_length_exceeding_envelope_rejected() {
        // Header declares 10 bytes but only 6 are present.
        let bytes = [5u8, 2, 10, 0, 0xAA, 0xBB];
        let result = DmlMessage::decode(&bytes);
        assert!(matches!(result, Err(SpiralError::Protocol(_))));
    }

    #[test]
    fn test_short_input_rejected() {
        assert!(DmlMessage::decode(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_field_roundtrip_all_types() {
        let mut writer = FieldWriter::new();
        writer.write_i8(-8);
        writer.write_u8(8);
        writer.write_i16(-1600);
        writer.write_u16(1600);
        writer.write_i32(-320_000);
        writer.write_u32(320_000);
        writer.write_u64(0xDEAD_BEEF_CAFE);
        writer.write_f32(2.5);
        writer.write_f64(-0.125);
        writer.write_str("wizard").unwrap();
        writer.write_wstr("city").unwrap();
        let body = writer.finish();

        let mut reader = FieldReader::new(&body);
        assert_eq!(reader.read_i8().unwrap(), -8);
        assert_eq!(reader.read_u8().unwrap(), 8);
        assert_eq!(reader.read_i16().unwrap(), -1600);
        assert_eq!(reader.read_u16().unwrap(), 1600);
        assert_eq!(reader.read_i32().unwrap(), -320_000);
        assert_eq!(reader.read_u32().unwrap(), 320_000);
        assert_eq!(reader.read_u64().unwrap(), 0xDEAD_BEEF_CAFE);
        assert_eq!(reader.read_f32().unwrap(), 2.5);
        assert_eq!(reader.read_f64().unwrap(), -0.125);
        assert_eq!(reader.read_str().unwrap(), "wizard");
        assert_eq!(reader.read_wstr().unwrap(), "city");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_field_reader_truncated() {
        let mut reader = FieldReader::new(&[0x01]);
        assert!(matches!(
            reader.read_u32(),
            Err(SpiralError::Truncated(_))
        ));
    }

    #[test]
    fn test_string_field_layout() {
        let mut writer = FieldWriter::new();
        writer.write_str("ab").unwrap();
        assert_eq!(writer.finish(), vec![2, 0, b'a', b'b']);
    }
}
