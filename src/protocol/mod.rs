//! Protocol Module
//!
//! The memcached binary protocol: message layout, opcodes, status codes and
//! a restartable streaming parser.
//!
//! ### Message Format
//! ```text
//! ┌──────────────┬──────────┬──────────┬──────────────────────┐
//! │ Header (24)  │ Extras   │ Key      │ Value                │
//! └──────────────┴──────────┴──────────┴──────────────────────┘
//! ```
//!
//! ### Magic
//! - 0x80: request
//! - 0x81: response
//!
//! ### Status Codes (subset)
//! - 0x0000: SUCCESS
//! - 0x0001: KEY_NOT_FOUND
//! - 0x0002: KEY_EXISTS
//! - 0x0020: AUTH_ERROR

mod header;
mod opcode;
mod status;
mod codec;
mod extras;

pub use header::{Header, Magic, HEADER_SIZE};
pub use opcode::Opcode;
pub use status::Status;
pub use codec::{
    encode_request, encode_request_into, encode_response,
    next_message, parse_buffer, parse_bytes, parse_message,
    Message, MAX_BODY_SIZE,
};
pub use extras::{counter_extras, decode_counter, expiration_extras, store_extras};
