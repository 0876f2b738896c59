//! Error types for spiralwire.

use thiserror::Error;

/// Main error type for all spiralwire operations.
#[derive(Debug, Error)]
pub enum SpiralError {
    /// Frame did not start with the expected magic bytes.
    #[error("invalid frame magic: expected 0xF00D but got {0:#06x}")]
    InvalidMagic(u16),

    /// Data ended before a complete structure could be decoded.
    #[error("truncated data while reading {0}")]
    Truncated(String),

    /// Frame body exceeds the maximum encodable length.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    /// Protocol violation (malformed message, bad length, unexpected opcode).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Session handshake could not complete.
    #[error("session handshake failed: {0}")]
    HandshakeFailed(String),

    /// Session handshake was cancelled or timed out.
    #[error("session handshake cancelled")]
    HandshakeCancelled,

    /// Inbound message had no registered handler.
    #[error("no handler registered for service {service}, order {order}")]
    Unrouted { service: u8, order: u8 },

    /// A message handler reported an error.
    #[error("handler error: {0}")]
    Handler(String),

    /// Operation attempted after the client shut down.
    #[error("client is closed")]
    Closed,

    /// File or record contents did not match the expected format.
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Table record declared a field type this decoder does not know.
    #[error("unknown field type {0:#04x}")]
    UnknownFieldType(u8),
}

/// Result type alias using SpiralError.
pub type Result<T> = std::result::Result<T, SpiralError>;
