//! Wire protocol - outer frame envelope, session control records, and the
//! DML message envelope.
//!
//! - [`frame`]: the magic-prefixed, length-delimited outer envelope
//! - [`control`]: session-layer records (offer, accept, keep-alives)
//! - [`dml`]: the inner `{service, order, length, body}` message envelope

pub mod control;
pub mod dml;
pub mod frame;

pub use dml::DmlMessage;
pub use frame::{Frame, FrameBuffer};
