//! Fixed 24-byte message header
//!
//! ```text
//! Byte/     0       |       1       |       2       |       3       |
//!    /              |               |               |               |
//!   |0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|
//!   +---------------+---------------+---------------+---------------+
//!  0| Magic         | Opcode        | Key length                    |
//!   +---------------+---------------+---------------+---------------+
//!  4| Extras length | Data type     | Status / vbucket id           |
//!   +---------------+---------------+---------------+---------------+
//!  8| Total body length                                             |
//!   +---------------+---------------+---------------+---------------+
//! 12| Opaque                                                        |
//!   +---------------+---------------+---------------+---------------+
//! 16| CAS                                                           |
//!   |                                                               |
//!   +---------------+---------------+---------------+---------------+
//! ```
//!
//! All multi-byte fields are big-endian.

use crate::error::{MemcacheError, Result};
use super::{Opcode, Status};

/// Header size in bytes
pub const HEADER_SIZE: usize = 24;

/// Request/response discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Magic {
    Request = 0x80,
    Response = 0x81,
}

impl Magic {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x80 => Ok(Magic::Request),
            0x81 => Ok(Magic::Response),
            _ => Err(MemcacheError::Protocol(format!(
                "Invalid magic byte: 0x{:02x}",
                byte
            ))),
        }
    }
}

/// A decoded message header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Request or response
    pub magic: Magic,

    /// Command this message belongs to
    pub opcode: Opcode,

    /// Length of the key section
    pub key_length: u16,

    /// Length of the extras section
    pub extras_length: u8,

    /// Reserved, always 0
    pub data_type: u8,

    /// Status on responses, vbucket id on requests
    pub vbucket_or_status: u16,

    /// Extras + key + value
    pub total_body_length: u32,

    /// Copied from request to response, used for correlation
    pub opaque: u32,

    /// Item version (0 when not applicable)
    pub cas: u64,
}

impl Header {
    /// Response status (meaningful on responses only)
    pub fn status(&self) -> Status {
        Status::from_u16(self.vbucket_or_status)
    }

    /// Length of the value section implied by the other lengths
    pub fn value_length(&self) -> usize {
        (self.total_body_length as usize)
            .saturating_sub(self.extras_length as usize + self.key_length as usize)
    }

    /// Append the 24 header bytes to `out`
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.magic as u8);
        out.push(self.opcode.as_u8());
        out.extend_from_slice(&self.key_length.to_be_bytes());
        out.push(self.extras_length);
        out.push(self.data_type);
        out.extend_from_slice(&self.vbucket_or_status.to_be_bytes());
        out.extend_from_slice(&self.total_body_length.to_be_bytes());
        out.extend_from_slice(&self.opaque.to_be_bytes());
        out.extend_from_slice(&self.cas.to_be_bytes());
    }

    /// Encode to a fixed array
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        self.write_to(&mut buf);
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Decode the first 24 bytes of `bytes`
    ///
    /// Fails on a short buffer, an unknown magic byte, or section lengths
    /// that cannot fit inside the declared body.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(MemcacheError::Protocol(format!(
                "Incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let header = Header {
            magic: Magic::from_u8(bytes[0])?,
            opcode: Opcode::from_u8(bytes[1]),
            key_length: u16::from_be_bytes([bytes[2], bytes[3]]),
            extras_length: bytes[4],
            data_type: bytes[5],
            vbucket_or_status: u16::from_be_bytes([bytes[6], bytes[7]]),
            total_body_length: u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            opaque: u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            cas: u64::from_be_bytes([
                bytes[16], bytes[17], bytes[18], bytes[19],
                bytes[20], bytes[21], bytes[22], bytes[23],
            ]),
        };

        let sections = header.extras_length as u64 + header.key_length as u64;
        if sections > header.total_body_length as u64 {
            return Err(MemcacheError::Protocol(format!(
                "Header lengths exceed body: extras {} + key {} > body {}",
                header.extras_length, header.key_length, header.total_body_length
            )));
        }

        Ok(header)
    }
}
