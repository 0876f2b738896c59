//! Session-layer control message payloads.
//!
//! Control frames carry small fixed-layout little-endian records that drive
//! the session lifecycle: the server's opening [`SessionOffer`], the client's
//! [`SessionAccept`] echo, and the periodic keep-alive exchange.

use bytes::BufMut;

use crate::error::{Result, SpiralError};

/// Control opcodes carried in the frame body header.
pub mod opcode {
    /// Server offers a session to a freshly connected client.
    pub const SESSION_OFFER: u8 = 0x00;
    /// Periodic liveness probe, sent by both sides.
    pub const SESSION_KEEP_ALIVE: u8 = 0x03;
    /// Acknowledgement of a keep-alive probe.
    pub const SESSION_KEEP_ALIVE_RSP: u8 = 0x04;
    /// Client accepts a session offer.
    pub const SESSION_ACCEPT: u8 = 0x05;
}

/// Length of the signature suffix on signed session offers.
const SIGNATURE_LEN: usize = 256;

fn take<'a>(buf: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(SpiralError::Truncated(what.to_string()));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn read_u16(buf: &mut &[u8], what: &str) -> Result<u16> {
    let b = take(buf, 2, what)?;
    Ok(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    let b = take(buf, 4, what)?;
    Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Server's opening control message carrying the session parameters.
///
/// The message blob on the wire is `raw_message` concatenated with an
/// optional 256-byte signature; blobs of 256 bytes or fewer carry no
/// signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOffer {
    pub session_id: u16,
    pub time_secs: u32,
    pub time_millis: u32,
    pub raw_message: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SessionOffer {
    pub fn encode(&self) -> Vec<u8> {
        let msg_len = self.raw_message.len() + self.signature.len();
        let mut buf = Vec::with_capacity(19 + msg_len);

        buf.put_u16_le(self.session_id);
        buf.put_bytes(0, 4);
        buf.put_u32_le(self.time_secs);
        buf.put_u32_le(self.time_millis);
        buf.put_u32_le(msg_len as u32);
        buf.extend_from_slice(&self.raw_message);
        buf.extend_from_slice(&self.signature);
        buf.put_u8(0);

        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;

        let session_id = read_u16(&mut buf, "session offer")?;
        take(&mut buf, 4, "session offer")?;
        let time_secs = read_u32(&mut buf, "session offer")?;
        let time_millis = read_u32(&mut buf, "session offer")?;

        let msg_len = read_u32(&mut buf, "session offer")? as usize;
        let msg = take(&mut buf, msg_len, "session offer message")?;

        let (raw_message, signature) = if msg_len > SIGNATURE_LEN {
            let split = msg_len - SIGNATURE_LEN;
            (msg[..split].to_vec(), msg[split..].to_vec())
        } else {
            (msg.to_vec(), Vec::new())
        };

        Ok(Self {
            session_id,
            time_secs,
            time_millis,
            raw_message,
            signature,
        })
    }
}

/// Client's acknowledgement of a [`SessionOffer`], echoing its parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionAccept {
    pub time_secs: u32,
    pub time_millis: u32,
    pub session_id: u16,
    pub encrypted_message: Vec<u8>,
}

impl SessionAccept {
    pub fn encode(&self) -> Vec<u8> {
        // The message field is never empty on the wire.
        let encrypted: &[u8] = if self.encrypted_message.is_empty() {
            &[0]
        } else {
            &self.encrypted_message
        };

        let mut buf = Vec::with_capacity(21 + encrypted.len());

        buf.put_bytes(0, 6);
        buf.put_u32_le(self.time_secs);
        buf.put_u32_le(self.time_millis);
        buf.put_u16_le(self.session_id);
        buf.put_u32_le(encrypted.len() as u32);
        buf.extend_from_slice(encrypted);
        buf.put_u8(0);

        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;

        take(&mut buf, 6, "session accept")?;
        let time_secs = read_u32(&mut buf, "session accept")?;
        let time_millis = read_u32(&mut buf, "session accept")?;
        let session_id = read_u16(&mut buf, "session accept")?;

        let enc_len = read_u32(&mut buf, "session accept")? as usize;
        let encrypted_message = take(&mut buf, enc_len, "session accept message")?.to_vec();

        Ok(Self {
            time_secs,
            time_millis,
            session_id,
            encrypted_message,
        })
    }
}

/// Client-side keep-alive probe sent every heartbeat interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientKeepAlive {
    pub session_id: u16,
    /// Milliseconds within the current wall-clock second.
    pub time_millis: u16,
    /// Whole minutes since the session was established.
    pub session_duration_mins: u16,
}

impl ClientKeepAlive {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6);
        buf.put_u16_le(self.session_id);
        buf.put_u16_le(self.time_millis);
        buf.put_u16_le(self.session_duration_mins);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        Ok(Self {
            session_id: read_u16(&mut buf, "client keep-alive")?,
            time_millis: read_u16(&mut buf, "client keep-alive")?,
            session_duration_mins: read_u16(&mut buf, "client keep-alive")?,
        })
    }
}

/// Server-side keep-alive probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerKeepAlive {
    pub session_id: u16,
    pub uptime_millis: u32,
}

impl ServerKeepAlive {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6);
        buf.put_u16_le(self.session_id);
        buf.put_u32_le(self.uptime_millis);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        Ok(Self {
            session_id: read_u16(&mut buf, "server keep-alive")?,
            uptime_millis: read_u32(&mut buf, "server keep-alive")?,
        })
    }
}

/// Keep-alive acknowledgement. Carries no payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAliveRsp;

impl KeepAliveRsp {
    pub fn encode(&self) -> Vec<u8> {
        Vec::new()
    }

    pub fn decode(_data: &[u8]) -> Result<Self> {
        Ok(Self)
    }
}
