//! Outer wire envelope encoding and decoding.
//!
//! Every frame on the wire has the layout:
//!
//! ```text
//! ┌──────────┬──────────────┬───────────────┬───────────┬─────────┐
//! │ Magic    │ Length       │ [Long length] │ Body      │ Trailer │
//! │ 2 bytes  │ 2 bytes      │ 4 bytes       │ N bytes   │ in body │
//! │ 0xF00D   │ u16 LE       │ u32 LE        │           │         │
//! └──────────┴──────────────┴───────────────┴───────────┴─────────┘
//! ```
//!
//! The long length field is present only when the short field holds the
//! `0x8000` marker. The on-wire length counts the 4-byte body header, the
//! payload, and the trailing `0x00` byte. All integers are little endian.
//!
//! The body starts with its own 4-byte header:
//!
//! ```text
//! [Control(1)] [Opcode(1)] [Reserved(2)] [Payload(N)]
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, SpiralError};

/// Magic bytes at the start of every frame.
pub const FRAME_MAGIC: u16 = 0xF00D;

/// Marker in the short length field announcing a u32 length field.
pub const LENGTH_EXTENSION: u16 = 0x8000;

/// Size of the body header (control flag, opcode, reserved).
pub const BODY_HEADER_LEN: usize = 4;

/// Minimum on-wire body length: body header plus the trailer byte.
pub const MIN_BODY_LEN: usize = BODY_HEADER_LEN + 1;

/// A decoded frame.
///
/// Control frames carry a session-layer opcode; non-control frames carry an
/// encoded DML message in `payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Whether this is a session-layer control frame.
    pub control: bool,
    /// Control opcode. Zero for application message frames.
    pub opcode: u8,
    /// Frame payload (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame from raw parts.
    pub fn new(control: bool, opcode: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            control,
            opcode,
            payload: payload.into(),
        }
    }

    /// Create a session-layer control frame.
    pub fn session(opcode: u8, payload: impl Into<Bytes>) -> Self {
        Self::new(true, opcode, payload)
    }

    /// Create an application message frame.
    pub fn message(payload: impl Into<Bytes>) -> Self {
        Self::new(false, 0, payload)
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}

/// Encode a complete frame, envelope included, as a single byte vector.
///
/// # Errors
///
/// Returns [`SpiralError::FrameTooLarge`] if the body would not fit in the
/// u32 length field.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
    let body_len = BODY_HEADER_LEN + frame.payload.len();
    // The on-wire length also counts the trailer byte.
    let wire_len = body_len as u64 + 1;
    if wire_len > u32::MAX as u64 {
        return Err(SpiralError::FrameTooLarge(body_len));
    }

    let mut buf = Vec::with_capacity(8 + wire_len as usize);
    buf.put_u16_le(FRAME_MAGIC);
    if wire_len <= 0x7FFF {
        buf.put_u16_le(wire_len as u16);
    } else {
        buf.put_u16_le(LENGTH_EXTENSION);
        buf.put_u32_le(wire_len as u32);
    }
    buf.put_u8(u8::from(frame.control));
    buf.put_u8(frame.opcode);
    buf.put_u16_le(0);
    buf.extend_from_slice(&frame.payload);
    buf.put_u8(0);

    Ok(buf)
}

/// Frame parsing state.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for magic and the short length field (4 bytes).
    Envelope,
    /// Short field held the extension marker, waiting for the u32 length.
    ExtendedLength,
    /// Length known, waiting for the complete body and trailer.
    Body { wire_len: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
///
/// Handles fragmented reads: partial envelopes and bodies are buffered
/// internally until enough data arrives. All data is stored in a single
/// `BytesMut` to minimise allocations.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_wire_len: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer accepting frames up to the protocol maximum.
    pub fn new() -> Self {
        Self::with_max_wire_len(u32::MAX)
    }

    /// Create a new frame buffer with a custom maximum on-wire body length.
    pub fn with_max_wire_len(max_wire_len: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::Envelope,
            max_wire_len,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns the frames completed by this push (possibly none). Partial
    /// data is retained for the next call.
    ///
    /// # Errors
    ///
    /// Returns an error on bad magic, a length below the 5-byte minimum, or
    /// a length above the configured maximum. The buffer is not usable after
    /// an error; the connection should be torn down.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }

        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Frame>> {
        match self.state {
            State::Envelope => {
                if self.buffer.len() < 4 {
                    return Ok(None);
                }

                let magic = u16::from_le_bytes([self.buffer[0], self.buffer[1]]);
                if magic != FRAME_MAGIC {
                    return Err(SpiralError::InvalidMagic(magic));
                }

                let short_len = u16::from_le_bytes([self.buffer[2], self.buffer[3]]);
                let _ = self.buffer.split_to(4);

                if short_len == LENGTH_EXTENSION {
                    self.state = State::ExtendedLength;
                } else {
                    self.state = State::Body {
                        wire_len: self.validate_wire_len(u32::from(short_len))?,
                    };
                }

                self.try_extract_one()
            }

            State::ExtendedLength => {
                if self.buffer.len() < 4 {
                    return Ok(None);
                }

                let long_len = u32::from_le_bytes([
                    self.buffer[0],
                    self.buffer[1],
                    self.buffer[2],
                    self.buffer[3],
                ]);
                let _ = self.buffer.split_to(4);

                self.state = State::Body {
                    wire_len: self.validate_wire_len(long_len)?,
                };

                self.try_extract_one()
            }

            State::Body { wire_len } => {
                if self.buffer.len() < wire_len {
                    return Ok(None);
                }

                let body = self.buffer.split_to(wire_len).freeze();
                self.state = State::Envelope;

                // Strip the body header and the trailer byte.
                Ok(Some(Frame {
                    control: body[0] == 0x01,
                    opcode: body[1],
                    payload: body.slice(BODY_HEADER_LEN..wire_len - 1),
                }))
            }
        }
    }

    fn validate_wire_len(&self, wire_len: u32) -> Result<usize> {
        if (wire_len as usize) < MIN_BODY_LEN {
            return Err(SpiralError::Truncated(format!(
                "frame body: expected at least {MIN_BODY_LEN} bytes but length field holds {wire_len}"
            )));
        }
        if wire_len > self.max_wire_len {
            return Err(SpiralError::FrameTooLarge(wire_len as usize));
        }
        Ok(wire_len as usize)
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
