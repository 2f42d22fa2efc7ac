//! SASL PLAIN handshake
//!
//! Runs on a freshly connected stream before any queued request is written:
//!
//! ```text
//! client                         server
//!   │── LIST_MECHS (0x20) ─────────▶│
//!   │◀──────────────── mechanisms ──│
//!   │── AUTH "PLAIN" \0user\0pass ─▶│
//!   │◀────────────── AUTH reply ────│   status 0x20 => failure
//! ```

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::Credentials;
use crate::error::{MemcacheError, Result};
use crate::protocol::{encode_request, parse_bytes, Message, Opcode, Status};

const MECHANISM: &[u8] = b"PLAIN";

/// Authenticate `stream` with `credentials`
///
/// `buffer` is the connection's accumulation buffer; bytes that arrive after
/// the final reply stay in it.
pub async fn authenticate<S>(
    stream: &mut S,
    buffer: &mut BytesMut,
    credentials: &Credentials,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let list = encode_request(Opcode::SaslListMechs, b"", b"", b"", 0, 0);
    stream.write_all(&list).await?;

    loop {
        for message in read_messages(stream, buffer).await? {
            if message.opcode() == Opcode::SaslListMechs {
                tracing::debug!("SASL mechanisms received, sending PLAIN auth");
                stream.write_all(&plain_auth_request(credentials)).await?;
            } else if message.status() == Status::AuthError {
                return Err(MemcacheError::Authentication(
                    "memcached server authentication failed".to_string(),
                ));
            } else if message.opcode() == Opcode::SaslAuth {
                tracing::debug!(user = %credentials.username, "SASL authentication succeeded");
                return Ok(());
            } else {
                tracing::trace!(opcode = ?message.opcode(), "dropping message during handshake");
            }
        }
    }
}

/// Build the PLAIN auth request: key `PLAIN`, value `\0username\0password`
pub fn plain_auth_request(credentials: &Credentials) -> Vec<u8> {
    let mut payload =
        Vec::with_capacity(2 + credentials.username.len() + credentials.password.len());
    payload.push(0);
    payload.extend_from_slice(credentials.username.as_bytes());
    payload.push(0);
    payload.extend_from_slice(credentials.password.as_bytes());
    encode_request(Opcode::SaslAuth, MECHANISM, b"", &payload, 0, 0)
}

async fn read_messages<S>(stream: &mut S, buffer: &mut BytesMut) -> Result<Vec<Message>>
where
    S: AsyncRead + Unpin,
{
    loop {
        let messages = parse_bytes(buffer)?;
        if !messages.is_empty() {
            return Ok(messages);
        }
        if stream.read_buf(buffer).await? == 0 {
            return Err(MemcacheError::ConnectionClosed);
        }
    }
}
