//! Connection to one cache node
//!
//! A `Connection` is a cheap handle; the socket, the accumulation buffer and
//! the correlation table live in a background task that the handle feeds
//! over a channel. The task connects lazily on the first request, runs the
//! SASL handshake when credentials are configured, and tears everything down
//! on the first transport or protocol error so that the next request starts
//! from a fresh socket.
//!
//! ```text
//!             first request               handshake done
//! Disconnected ───────────▶ Connecting ──▶ Authenticating ──▶ Ready
//!      ▲                        │                │              │
//!      └────────────── error / close / timeout ─┴──────────────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};

use crate::config::{self, ClientConfig, Credentials, ServerConfig};
use crate::error::{MemcacheError, Result};
use crate::protocol::{next_message, Message};
use super::auth;
use super::correlator::{Correlator, Dispatch, ResponseHandler};

/// Initial capacity of the per-connection read buffer
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Lifecycle of the socket behind a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Authenticating = 2,
    Ready = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Authenticating,
            3 => ConnectionState::Ready,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[derive(Debug, Clone)]
struct StateCell(Arc<AtomicU8>);

impl StateCell {
    fn new() -> Self {
        StateCell(Arc::new(AtomicU8::new(ConnectionState::Disconnected as u8)))
    }

    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Per-node socket settings
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Hostname or IP literal (IPv6 without brackets)
    pub host: String,

    pub port: u16,

    /// Response deadline for each written request
    pub timeout: Duration,

    /// Bound on TCP connect plus SASL handshake
    pub connect_timeout: Duration,

    /// Enable SO_KEEPALIVE on the socket
    pub keep_alive: bool,

    /// SASL PLAIN credentials, when the node requires them
    pub credentials: Option<Credentials>,
}

impl ConnectionConfig {
    pub fn new(server: &ServerConfig, client: &ClientConfig) -> Self {
        Self {
            host: server.host.clone(),
            port: server.port,
            timeout: client.timeout(),
            connect_timeout: client.conn_timeout(),
            keep_alive: client.keep_alive,
            credentials: server.credentials.clone(),
        }
    }

    pub fn server_key(&self) -> String {
        config::server_key(&self.host, self.port)
    }
}

/// One encoded request waiting for the socket
#[derive(Debug)]
struct PendingWrite {
    /// Correlation id the response(s) will carry
    opaque: u32,

    /// Encoded request (or pipeline)
    bytes: Vec<u8>,

    /// Where the response(s) go
    handler: ResponseHandler,
}

/// Messages from handles to the connection task
#[derive(Debug)]
enum Request {
    Write(PendingWrite),

    /// Forget an abandoned quiet request
    Cancel(u32),

    Close,
}

/// Handle to the connection task of one node
///
/// Must be created inside a tokio runtime. The task exits once every handle
/// has been dropped.
#[derive(Clone)]
pub struct Connection {
    /// `host:port` of the node
    server_key: Arc<str>,

    /// Channel into the connection task
    requests: mpsc::UnboundedSender<Request>,

    /// Socket state published by the task
    state: StateCell,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("server_key", &self.server_key)
            .field("state", &self.state.get())
            .finish()
    }
}

impl Connection {
    /// Spawn the connection task; no socket is opened until the first request
    pub fn new(config: ConnectionConfig) -> Self {
        let server_key: Arc<str> = config.server_key().into();
        let (requests, receiver) = mpsc::unbounded_channel();
        let state = StateCell::new();

        let driver = Driver {
            server_key: server_key.clone(),
            config,
            requests: receiver,
            correlator: Correlator::new(),
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            state: state.clone(),
        };
        tokio::spawn(driver.run());

        Self {
            server_key,
            requests,
            state,
        }
    }

    /// `host:port` of the node
    pub fn server_key(&self) -> &str {
        &self.server_key
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Write `bytes` and wait for the single response carrying `opaque`
    pub async fn send(&self, opaque: u32, bytes: Vec<u8>) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        self.submit(opaque, bytes, ResponseHandler::Once(tx))?;
        rx.await.unwrap_or(Err(MemcacheError::ConnectionClosed))
    }

    /// Write `bytes` and stream every response carrying `opaque` up to and
    /// including the empty-bodied terminator
    pub fn send_quiet(&self, opaque: u32, bytes: Vec<u8>) -> Result<QuietResponses> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.submit(opaque, bytes, ResponseHandler::Quiet(tx))?;
        Ok(QuietResponses {
            opaque,
            receiver: rx,
            requests: self.requests.clone(),
            finished: false,
        })
    }

    /// Shut the socket; outstanding requests fail with `ConnectionClosed`
    pub fn close(&self) {
        let _ = self.requests.send(Request::Close);
    }

    fn submit(&self, opaque: u32, bytes: Vec<u8>, handler: ResponseHandler) -> Result<()> {
        self.requests
            .send(Request::Write(PendingWrite {
                opaque,
                bytes,
                handler,
            }))
            .map_err(|_| MemcacheError::ConnectionClosed)
    }
}

/// Responses of one quiet (pipelined) request
///
/// Dropping it before the stream ends cancels the request on the
/// connection, so its deadline no longer counts against the socket.
#[derive(Debug)]
pub struct QuietResponses {
    /// Opaque shared by every response in the stream
    opaque: u32,

    /// Responses forwarded by the connection task
    receiver: mpsc::UnboundedReceiver<Result<Message>>,

    /// Channel used to cancel on early drop
    requests: mpsc::UnboundedSender<Request>,

    /// Set once the last response or an error has been yielded
    finished: bool,
}

impl QuietResponses {
    /// Next response; `None` after the terminator or an error was yielded
    pub async fn next(&mut self) -> Option<Result<Message>> {
        if self.finished {
            return None;
        }
        match self.receiver.recv().await {
            Some(Ok(message)) => {
                self.finished = message.ends_quiet_stream();
                Some(Ok(message))
            }
            Some(Err(err)) => {
                self.finished = true;
                Some(Err(err))
            }
            None => {
                self.finished = true;
                Some(Err(MemcacheError::ConnectionClosed))
            }
        }
    }
}

impl Drop for QuietResponses {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.requests.send(Request::Cancel(self.opaque));
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

/// State owned by the connection task
struct Driver {
    /// `host:port`, for log fields
    server_key: Arc<str>,

    /// Socket settings
    config: ConnectionConfig,

    /// Requests from every handle
    requests: mpsc::UnboundedReceiver<Request>,

    /// Outstanding handlers and their deadlines
    correlator: Correlator,

    /// Bytes read but not yet parsed (kept across reads)
    buffer: BytesMut,

    /// Published socket state
    state: StateCell,
}

impl Driver {
    async fn run(mut self) {
        while let Some(request) = self.requests.recv().await {
            let first = match request {
                Request::Write(write) => write,
                Request::Cancel(_) | Request::Close => continue,
            };

            let mut queued = vec![first];
            let outcome = match self.establish(&mut queued).await {
                Ok(stream) => {
                    self.state.set(ConnectionState::Ready);
                    self.serve(stream, queued).await
                }
                Err(err) => {
                    // Everything queued behind the failed setup fails with it.
                    for write in queued {
                        write.handler.deliver(Err(err.clone()));
                    }
                    Err(err)
                }
            };
            self.reset(outcome);
        }
        tracing::trace!(server = %self.server_key, "connection task exiting");
    }

    /// Connect (and authenticate), buffering requests that arrive meanwhile
    async fn establish(&mut self, queued: &mut Vec<PendingWrite>) -> Result<TcpStream> {
        self.state.set(ConnectionState::Connecting);
        tracing::debug!(server = %self.server_key, "connecting");

        let open = time::timeout(
            self.config.connect_timeout,
            open_stream(&self.config, &mut self.buffer, &self.state),
        );
        tokio::pin!(open);

        loop {
            tokio::select! {
                opened = &mut open => {
                    return match opened {
                        Ok(result) => result,
                        Err(_) => Err(MemcacheError::ConnectTimeout),
                    };
                }
                request = self.requests.recv() => match request {
                    Some(Request::Write(write)) => queued.push(write),
                    Some(Request::Cancel(opaque)) => queued.retain(|write| write.opaque != opaque),
                    Some(Request::Close) | None => return Err(MemcacheError::ConnectionClosed),
                },
            }
        }
    }

    /// Pump requests out and responses in until the socket fails or closes
    async fn serve(&mut self, stream: TcpStream, queued: Vec<PendingWrite>) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();
        let mut outbox = BytesMut::new();
        for write in queued {
            self.enqueue(write, &mut outbox);
        }

        loop {
            let deadline = self.correlator.next_deadline();

            tokio::select! {
                read = reader.read_buf(&mut self.buffer) => {
                    if read? == 0 {
                        return Err(MemcacheError::ConnectionClosed);
                    }
                    // Each frame is dispatched before the next is parsed, so a
                    // malformed frame cannot take earlier answers down with it.
                    while let Some(message) = next_message(&mut self.buffer)? {
                        let opaque = message.opaque();
                        if self.correlator.dispatch(message) == Dispatch::Unmatched {
                            tracing::trace!(server = %self.server_key, opaque, "dropping unmatched response");
                        }
                    }
                }
                written = writer.write(&outbox), if !outbox.is_empty() => {
                    match written? {
                        0 => return Err(MemcacheError::ConnectionClosed),
                        n => outbox.advance(n),
                    }
                }
                request = self.requests.recv() => match request {
                    Some(Request::Write(write)) => self.enqueue(write, &mut outbox),
                    Some(Request::Cancel(opaque)) => {
                        if self.correlator.cancel(opaque) {
                            tracing::trace!(server = %self.server_key, opaque, "quiet request abandoned");
                        }
                    }
                    Some(Request::Close) | None => {
                        let _ = writer.shutdown().await;
                        return Ok(());
                    }
                },
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if self.correlator.is_expired(Instant::now()) {
                        return Err(MemcacheError::Timeout);
                    }
                }
            }
        }
    }

    fn enqueue(&mut self, write: PendingWrite, outbox: &mut BytesMut) {
        let deadline = Instant::now() + self.config.timeout;
        self.correlator.register(write.opaque, write.handler, deadline);
        outbox.extend_from_slice(&write.bytes);
    }

    /// Drop the socket state and fail whatever was outstanding
    fn reset(&mut self, outcome: Result<()>) {
        let err = match outcome {
            Ok(()) => {
                tracing::debug!(server = %self.server_key, "connection closed");
                MemcacheError::ConnectionClosed
            }
            Err(err) => {
                tracing::debug!(server = %self.server_key, error = %err, "connection failed");
                err
            }
        };

        let failed = self.correlator.fail_all(&err);
        if failed > 0 {
            tracing::debug!(server = %self.server_key, failed, "failed outstanding requests");
        }
        self.buffer.clear();
        self.state.set(ConnectionState::Disconnected);
    }
}

async fn open_stream(
    config: &ConnectionConfig,
    buffer: &mut BytesMut,
    state: &StateCell,
) -> Result<TcpStream> {
    let addr = lookup_host((config.host.as_str(), config.port))
        .await?
        .next()
        .ok_or_else(|| {
            MemcacheError::from(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("could not resolve {}", config.server_key()),
            ))
        })?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if config.keep_alive {
        socket.set_keepalive(true)?;
    }

    let mut stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;

    if let Some(credentials) = &config.credentials {
        state.set(ConnectionState::Authenticating);
        auth::authenticate(&mut stream, buffer, credentials).await?;
    }

    Ok(stream)
}
