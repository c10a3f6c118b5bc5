//! Wire protocol for the HumanitZ flavour of Source RCON.
//!
//! All packets are framed as:
//! [size: i32 LE] [id: i32 LE] [type: i32 LE] [body: &[u8]] [0x00] [0x00]
//!
//! `size` counts every byte after the size field itself. The server answers
//! every packet with `id = 0`, so ids are only meaningful on the way out.

use thiserror::Error;

/// Client → Server packet types
pub mod client {
    /// Authenticate with the rcon password
    /// Body: password
    pub const AUTH: i32 = 3;

    /// Run a console command
    /// Body: command line
    pub const EXECCOMMAND: i32 = 2;
}

/// Server → Client packet types
pub mod server {
    /// Handshake verdict. `id == -1` means the password was rejected.
    /// Shares its code with `client::EXECCOMMAND`; direction disambiguates.
    pub const AUTH_RESPONSE: i32 = 2;

    /// Command output (also sent once, empty, ahead of AUTH_RESPONSE)
    pub const RESPONSE_VALUE: i32 = 0;
}

/// Size prefix: 4 bytes
pub const SIZE_FIELD: usize = 4;

/// id + type
pub const FIXED_FIELDS: usize = 8;

/// Smallest frame we accept: id + type, terminator optional.
pub const MIN_FRAME_SIZE: usize = FIXED_FIELDS;

/// Upper bound on a declared frame size. Anything larger is a framing error.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// `id` the server uses to reject a password
pub const AUTH_FAILED_ID: i32 = -1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame size {size} outside {min}..={max}")]
    SizeOutOfRange { size: i64, min: usize, max: usize },

    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// One decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub packet_type: i32,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, packet_type: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            packet_type,
            body: body.into(),
        }
    }

    /// Value of the size field for this packet.
    pub fn size(&self) -> usize {
        FIXED_FIELDS + self.body.len() + 2
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self.id, self.packet_type, &self.body)
    }
}

/// Encode a framed packet into a Vec<u8>.
pub fn encode(id: i32, packet_type: i32, body: &str) -> Vec<u8> {
    let size = (FIXED_FIELDS + body.len() + 2) as i32;
    let mut buf = Vec::with_capacity(SIZE_FIELD + size as usize);
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(&packet_type.to_le_bytes());
    buf.extend_from_slice(body.as_bytes());
    buf.extend_from_slice(&[0, 0]);
    buf
}

/// Parse the size prefix. Returns the number of bytes that follow it.
pub fn decode_size(prefix: &[u8; SIZE_FIELD]) -> Result<usize, DecodeError> {
    let size = i32::from_le_bytes(*prefix) as i64;
    if size < MIN_FRAME_SIZE as i64 || size > MAX_FRAME_SIZE as i64 {
        return Err(DecodeError::SizeOutOfRange {
            size,
            min: MIN_FRAME_SIZE,
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(size as usize)
}

/// Decode the bytes following the size prefix.
///
/// Trailing NULs are stripped and invalid UTF-8 is replaced rather than
/// rejected; the server occasionally cuts multi-byte text mid-character.
pub fn decode(frame: &[u8]) -> Result<Packet, DecodeError> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(DecodeError::Truncated {
            expected: MIN_FRAME_SIZE,
            actual: frame.len(),
        });
    }
    let id = i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let packet_type = i32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);

    let mut body = &frame[FIXED_FIELDS..];
    while let [rest @ .., 0] = body {
        body = rest;
    }

    Ok(Packet {
        id,
        packet_type,
        body: String::from_utf8_lossy(body).into_owned(),
    })
}
