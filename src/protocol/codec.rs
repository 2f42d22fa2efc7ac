//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ```text
//! ┌──────────────┬──────────┬──────────┬──────────────────────┐
//! │ Header (24)  │ Extras   │ Key      │ Value                │
//! └──────────────┴──────────┴──────────┴──────────────────────┘
//!                 └──────── total_body_length ───────────────┘
//! ```
//!
//! The parser is a pure function of the bytes it is handed: a buffer that
//! ends mid-message simply yields fewer messages and a smaller consumed
//! count, and feeding the same bytes again (plus whatever arrived since)
//! produces the same result as feeding everything at once.

use bytes::{Bytes, BytesMut};

use crate::error::{MemcacheError, Result};
use super::{Header, Magic, Opcode, Status, HEADER_SIZE};

/// Maximum accepted body size (20 MB)
pub const MAX_BODY_SIZE: u32 = 20 * 1024 * 1024;

/// One complete protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,

    /// Command-specific fixed fields (flags, expiration, counter arguments)
    pub extras: Bytes,

    pub key: Bytes,

    /// Value, or the error text on failed responses
    pub value: Bytes,
}

impl Message {
    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }

    pub fn status(&self) -> Status {
        self.header.status()
    }

    pub fn opaque(&self) -> u32 {
        self.header.opaque
    }

    /// A zero-length body ends a quiet pipeline (NOOP replies, last STAT line).
    pub fn is_terminator(&self) -> bool {
        self.header.total_body_length == 0
    }

    /// Whether this message is the last one a quiet request will see
    ///
    /// Besides the terminator, any error status ends the stream; a node
    /// answering an unknown STAT group sends a single error with a body and
    /// nothing after it. Misses on GETK/GETKQ are the exception, since a
    /// pipeline keeps going past them.
    pub fn ends_quiet_stream(&self) -> bool {
        if self.is_terminator() {
            return true;
        }
        match self.status() {
            Status::Success => false,
            Status::KeyNotFound => !matches!(self.opcode(), Opcode::GetK | Opcode::GetKQ),
            _ => true,
        }
    }

    /// Full encoded length of this message
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.header.total_body_length as usize
    }
}

// =============================================================================
// Encoding
// =============================================================================

#[allow(clippy::too_many_arguments)]
fn encode_into(
    out: &mut Vec<u8>,
    magic: Magic,
    opcode: Opcode,
    vbucket_or_status: u16,
    key: &[u8],
    extras: &[u8],
    value: &[u8],
    opaque: u32,
    cas: u64,
) {
    debug_assert!(key.len() <= u16::MAX as usize);
    debug_assert!(extras.len() <= u8::MAX as usize);

    let header = Header {
        magic,
        opcode,
        key_length: key.len() as u16,
        extras_length: extras.len() as u8,
        data_type: 0,
        vbucket_or_status,
        total_body_length: (extras.len() + key.len() + value.len()) as u32,
        opaque,
        cas,
    };

    out.reserve(HEADER_SIZE + header.total_body_length as usize);
    header.write_to(out);
    out.extend_from_slice(extras);
    out.extend_from_slice(key);
    out.extend_from_slice(value);
}

/// Encode a request to bytes
///
/// Format: header (24) + extras + key + value. The body length is derived
/// from the slices; opcodes are not validated.
pub fn encode_request(
    opcode: Opcode,
    key: &[u8],
    extras: &[u8],
    value: &[u8],
    opaque: u32,
    cas: u64,
) -> Vec<u8> {
    let mut out = Vec::new();
    encode_request_into(&mut out, opcode, key, extras, value, opaque, cas);
    out
}

/// Append an encoded request to `out` (used to build pipelines)
pub fn encode_request_into(
    out: &mut Vec<u8>,
    opcode: Opcode,
    key: &[u8],
    extras: &[u8],
    value: &[u8],
    opaque: u32,
    cas: u64,
) {
    encode_into(out, Magic::Request, opcode, 0, key, extras, value, opaque, cas);
}

/// Encode a response to bytes
///
/// The client never sends responses; this exists for fake servers in tests
/// and benchmarks.
#[allow(clippy::too_many_arguments)]
pub fn encode_response(
    opcode: Opcode,
    status: Status,
    key: &[u8],
    extras: &[u8],
    value: &[u8],
    opaque: u32,
    cas: u64,
) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(
        &mut out,
        Magic::Response,
        opcode,
        status.as_u16(),
        key,
        extras,
        value,
        opaque,
        cas,
    );
    out
}

// =============================================================================
// Decoding
// =============================================================================

/// Inspect the front of `buf`; returns the header and full frame length once
/// a complete message is available.
fn complete_frame(buf: &[u8]) -> Result<Option<(Header, usize)>> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let header = Header::decode(buf)?;
    if header.total_body_length > MAX_BODY_SIZE {
        return Err(MemcacheError::Protocol(format!(
            "Body too large: {} bytes (max {})",
            header.total_body_length, MAX_BODY_SIZE
        )));
    }

    let frame_len = HEADER_SIZE + header.total_body_length as usize;
    if buf.len() < frame_len {
        return Ok(None);
    }
    Ok(Some((header, frame_len)))
}

fn split_frame(header: Header, frame: Bytes) -> Message {
    let extras_end = HEADER_SIZE + header.extras_length as usize;
    let key_end = extras_end + header.key_length as usize;
    Message {
        header,
        extras: frame.slice(HEADER_SIZE..extras_end),
        key: frame.slice(extras_end..key_end),
        value: frame.slice(key_end..),
    }
}

/// Decode one message from the front of `buf`
///
/// Returns `Ok(None)` when the header or body is still incomplete, otherwise
/// the message and the number of bytes it occupied.
pub fn parse_message(buf: &[u8]) -> Result<Option<(Message, usize)>> {
    match complete_frame(buf)? {
        Some((header, frame_len)) => {
            let frame = Bytes::copy_from_slice(&buf[..frame_len]);
            Ok(Some((split_frame(header, frame), frame_len)))
        }
        None => Ok(None),
    }
}

/// Decode every complete message at the front of `buf`
///
/// Returns the messages in wire order and the number of bytes they occupied,
/// so the caller can drop exactly that prefix from its accumulation buffer.
pub fn parse_buffer(buf: &[u8]) -> Result<(Vec<Message>, usize)> {
    let mut messages = Vec::new();
    let mut consumed = 0;

    while let Some((message, frame_len)) = parse_message(&buf[consumed..])? {
        messages.push(message);
        consumed += frame_len;
    }

    Ok((messages, consumed))
}

/// Decode the first complete message and remove it from `buf`
///
/// Returns `Ok(None)` and leaves `buf` untouched while the frame is still
/// incomplete. On error `buf` is also untouched, so messages taken off
/// earlier stay valid.
pub fn next_message(buf: &mut BytesMut) -> Result<Option<Message>> {
    match complete_frame(buf)? {
        Some((header, frame_len)) => {
            let frame = buf.split_to(frame_len).freeze();
            Ok(Some(split_frame(header, frame)))
        }
        None => Ok(None),
    }
}

/// Decode every complete message and remove it from `buf`
///
/// Messages share the split-off allocation rather than copying it. A
/// malformed frame fails the whole call; callers that must not lose the
/// messages ahead of it use [`next_message`] instead.
pub fn parse_bytes(buf: &mut BytesMut) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    while let Some(message) = next_message(buf)? {
        messages.push(message);
    }
    Ok(messages)
}
