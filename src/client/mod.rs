//! Client Module
//!
//! The user-facing cache client. Owns one `Connection` per node, routes each
//! key through a `ServerSelector`, retries transport failures and interprets
//! response statuses per command.
//!
//! ## Request Flow
//!
//! ```text
//! get(key) ──▶ encode ──▶ select node ──▶ Connection::send ──▶ status table
//!                              ▲                  │
//!                              │   retry / failover on transport error
//!                              └──────────────────┘
//! ```
//!
//! - `commands`: single-key commands and their status tables
//! - `multi`: pipelined multi-get across nodes
//! - `admin`: per-node broadcast commands (flush, stats, version, quit)

mod admin;
mod commands;
mod multi;
mod retry;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::config::{self, ClientConfig, ServerConfig};
use crate::error::{MemcacheError, Result};
use crate::network::{Connection, ConnectionConfig};
use crate::protocol::{Message, Status};
use crate::routing::{FailoverHook, FailoverSelector, ModuloSelector, ServerSelector};

pub use admin::Stats;
pub use commands::{CommandSpec, CounterOptions, Outcome, StoreOptions};
pub use multi::{MultiGetResult, NodeError};
pub use retry::RetryPolicy;

/// Longest key memcached accepts
pub const MAX_KEY_LENGTH: usize = 250;

/// Per-node outcome of a broadcast command, keyed by server key
pub type NodeResults<T> = HashMap<String, Result<T>>;

/// A stored value as returned by GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub value: Bytes,
    pub extras: Bytes,
    pub cas: u64,
}

impl Item {
    /// Client flags stored with the value, when the server sent them
    pub fn flags(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.extras.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}

impl From<Message> for Item {
    fn from(message: Message) -> Self {
        Item {
            value: message.value,
            extras: message.extras,
            cas: message.header.cas,
        }
    }
}

/// Memcached binary-protocol client
///
/// All methods take `&self`; share one client between tasks with an `Arc`.
/// Must be created inside a tokio runtime.
pub struct Client {
    connections: HashMap<String, Connection>,
    /// Server keys in configuration order, as handed to the selector
    server_keys: Vec<String>,
    config: ClientConfig,
    selector: Arc<dyn ServerSelector>,
    failover: Option<Arc<dyn FailoverHook>>,
    seq: AtomicU32,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("servers", &self.server_keys)
            .field("failover", &self.failover.is_some())
            .finish()
    }
}

impl Client {
    /// Build a client over `servers`
    ///
    /// Servers without inline credentials take them from `config`, then from
    /// the environment. Duplicate `host:port` entries share one connection.
    /// With `config.failover` set, a `FailoverSelector` serves as both the
    /// selector and the failover hook.
    pub fn new(servers: Vec<ServerConfig>, config: ClientConfig) -> Self {
        let mut connections = HashMap::new();
        let mut server_keys = Vec::new();

        for mut server in servers {
            let server_key = server.server_key();
            if connections.contains_key(&server_key) {
                continue;
            }
            server.resolve_credentials(&config);
            let connection = Connection::new(ConnectionConfig::new(&server, &config));
            connections.insert(server_key.clone(), connection);
            server_keys.push(server_key);
        }

        let selector: Arc<dyn ServerSelector>;
        let mut failover: Option<Arc<dyn FailoverHook>> = None;
        if config.failover {
            let failover_selector = Arc::new(FailoverSelector::new(config.failover_time()));
            failover = Some(failover_selector.clone() as Arc<dyn FailoverHook>);
            selector = failover_selector;
        } else {
            selector = Arc::new(ModuloSelector);
        }

        tracing::debug!(servers = ?server_keys, failover = config.failover, "client created");

        Self {
            connections,
            server_keys,
            config,
            selector,
            failover,
            seq: AtomicU32::new(0),
        }
    }

    /// Build a client from a `[user:pass@]host[:port],...` string, or from
    /// the environment when `servers` is `None`
    pub fn create(servers: Option<&str>, config: ClientConfig) -> Result<Self> {
        let servers = match servers {
            Some(servers) => config::parse_servers(servers)?,
            None => config::parse_servers(&config::servers_from_env())?,
        };
        Ok(Self::new(servers, config))
    }

    /// Build a client from `MEMCACHIER_SERVERS` / `MEMCACHE_SERVERS`
    pub fn from_env(config: ClientConfig) -> Result<Self> {
        Self::create(None, config)
    }

    /// Replace the key -> node mapping
    pub fn with_selector(mut self, selector: impl ServerSelector + 'static) -> Self {
        self.selector = Arc::new(selector);
        self
    }

    /// Install a hook run when a node exhausts its retries; enables the
    /// single rehash-and-resubmit attempt that follows it
    pub fn with_failover_hook(mut self, hook: impl FailoverHook + 'static) -> Self {
        self.failover = Some(Arc::new(hook));
        self
    }

    /// Server keys in configuration order
    pub fn servers(&self) -> &[String] {
        &self.server_keys
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Advance the opaque counter (wraps at 2^32) and return the new value
    pub fn next_sequence(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Close every node connection
    pub fn close(&self) {
        for connection in self.connections.values() {
            connection.close();
        }
    }

    // =========================================================================
    // Routing and Retry
    // =========================================================================

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.retries, self.config.retry_delay())
    }

    /// Node responsible for `key`
    pub(crate) fn route(&self, key: &[u8]) -> Result<&Connection> {
        let connection = self
            .selector
            .select(&self.server_keys, key)
            .and_then(|server_key| self.connections.get(&server_key));

        match connection {
            Some(connection) => Ok(connection),
            None => {
                tracing::warn!(key = %String::from_utf8_lossy(key), "no server available");
                Err(MemcacheError::NoServerAvailable)
            }
        }
    }

    /// Send a single-response request for `key`, retrying on its node and
    /// failing over once when a hook is installed
    pub(crate) async fn perform(&self, key: &[u8], request: Vec<u8>, seq: u32) -> Result<Message> {
        let connection = self.route(key)?;
        let result = self
            .retry_policy()
            .run(connection.server_key(), || connection.send(seq, request.clone()))
            .await;

        let err = match result {
            Err(err) if err.is_retryable() => err,
            other => return other,
        };
        let hook = match &self.failover {
            Some(hook) => hook,
            None => return Err(err),
        };

        hook.on_failure(connection.server_key(), &err);
        let next = self.route(key)?;
        tracing::debug!(
            from = connection.server_key(),
            to = next.server_key(),
            "failing over"
        );
        next.send(seq, request).await
    }
}

/// Status error for `command`, logged where it is created
pub(crate) fn status_error(command: &'static str, status: Status) -> MemcacheError {
    tracing::warn!(command, status = %status, "command failed");
    MemcacheError::Status { command, status }
}

pub(crate) fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(MemcacheError::InvalidKey("key is empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(MemcacheError::InvalidKey(format!(
            "key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}
