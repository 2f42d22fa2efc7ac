//! Configuration for memkv
//!
//! Centralized configuration with sensible defaults, plus parsing of
//! `[user:pass@]host[:port],...` connection strings.

use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{MemcacheError, Result};

/// Port used when a server entry omits one
pub const DEFAULT_PORT: u16 = 11211;

/// Server list used when neither an argument nor the environment gives one
pub const DEFAULT_SERVERS: &str = "localhost:11211";

const SERVERS_ENV: [&str; 2] = ["MEMCACHIER_SERVERS", "MEMCACHE_SERVERS"];
const USERNAME_ENV: [&str; 2] = ["MEMCACHIER_USERNAME", "MEMCACHE_USERNAME"];
const PASSWORD_ENV: [&str; 2] = ["MEMCACHIER_PASSWORD", "MEMCACHE_PASSWORD"];

/// Client-wide options
///
/// Deserializable so applications can keep it in their own config files;
/// every field is optional there and falls back to the default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    // -------------------------------------------------------------------------
    // Retry Configuration
    // -------------------------------------------------------------------------
    /// Attempts per operation before the error is surfaced
    pub retries: u32,

    /// Wait between attempts (milliseconds)
    pub retry_delay_ms: u64,

    // -------------------------------------------------------------------------
    // Item Defaults
    // -------------------------------------------------------------------------
    /// Default expiration in seconds (0 = never). Values above 30 days are
    /// interpreted by the server as absolute UNIX timestamps.
    pub expires: u32,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Per-request response timeout (milliseconds)
    pub timeout_ms: u64,

    /// Connect + authenticate timeout (milliseconds); twice `timeout_ms` when unset
    pub conn_timeout_ms: Option<u64>,

    /// Enable SO_KEEPALIVE on node sockets
    pub keep_alive: bool,

    /// Fallback SASL username for servers without inline credentials
    pub username: Option<String>,

    /// Fallback SASL password for servers without inline credentials
    pub password: Option<String>,

    // -------------------------------------------------------------------------
    // Failover Configuration
    // -------------------------------------------------------------------------
    /// Route around a node once its retries are exhausted
    pub failover: bool,

    /// How long a failed node stays excluded (milliseconds)
    pub failover_time_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_delay_ms: 200,
            expires: 0,
            timeout_ms: 500,
            conn_timeout_ms: None,
            keep_alive: false,
            username: None,
            password: None,
            failover: false,
            failover_time_ms: 60_000,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn conn_timeout(&self) -> Duration {
        match self.conn_timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.timeout() * 2,
        }
    }

    pub fn failover_time(&self) -> Duration {
        Duration::from_millis(self.failover_time_ms)
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the number of attempts per operation
    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    /// Set the delay between attempts (in milliseconds)
    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay_ms = ms;
        self
    }

    /// Set the default expiration (in seconds)
    pub fn expires(mut self, seconds: u32) -> Self {
        self.config.expires = seconds;
        self
    }

    /// Set the response timeout (in milliseconds)
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout_ms = ms;
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn conn_timeout_ms(mut self, ms: u64) -> Self {
        self.config.conn_timeout_ms = Some(ms);
        self
    }

    pub fn keep_alive(mut self, enabled: bool) -> Self {
        self.config.keep_alive = enabled;
        self
    }

    /// Set fallback SASL credentials
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = Some(username.into());
        self.config.password = Some(password.into());
        self
    }

    /// Enable failover with the given exclusion window (in milliseconds)
    pub fn failover(mut self, failover_time_ms: u64) -> Self {
        self.config.failover = true;
        self.config.failover_time_ms = failover_time_ms;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

// =============================================================================
// Server Descriptors
// =============================================================================

/// SASL PLAIN credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One cache node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Hostname or IP literal, IPv6 without brackets
    pub host: String,

    pub port: u16,

    /// Per-node credentials; `None` falls back to the client options
    pub credentials: Option<Credentials>,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// `host:port`, the identity used for routing and connection lookup
    pub fn server_key(&self) -> String {
        server_key(&self.host, self.port)
    }

    /// Fill in credentials from the client options, then the environment,
    /// when the entry carries none of its own.
    pub fn resolve_credentials(&mut self, config: &ClientConfig) {
        if self.credentials.is_some() {
            return;
        }
        let username = config.username.clone().or_else(|| first_env(&USERNAME_ENV));
        let password = config.password.clone().or_else(|| first_env(&PASSWORD_ENV));
        if let (Some(username), Some(password)) = (username, password) {
            self.credentials = Some(Credentials { username, password });
        }
    }
}

/// `host:port`, with IPv6 hosts bracketed
pub(crate) fn server_key(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Parse `[user:pass@]host[:port],...`
pub fn parse_servers(servers: &str) -> Result<Vec<ServerConfig>> {
    let mut parsed = Vec::new();

    for entry in servers.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (user_pass, host_port) = match entry.rsplit_once('@') {
            Some((user_pass, host_port)) => (Some(user_pass), host_port),
            None => (None, entry),
        };

        let invalid_port =
            || MemcacheError::Config(format!("invalid port in server entry '{}'", entry));

        // IPv6 literals are bracketed: `[::1]:11211`
        let (host, port) = match host_port.strip_prefix('[') {
            Some(bracketed) => {
                let (host, rest) = bracketed.split_once(']').ok_or_else(|| {
                    MemcacheError::Config(format!("unclosed '[' in server entry '{}'", entry))
                })?;
                let port = match rest {
                    "" => DEFAULT_PORT,
                    _ => rest
                        .strip_prefix(':')
                        .and_then(|port| port.parse::<u16>().ok())
                        .ok_or_else(invalid_port)?,
                };
                (host, port)
            }
            None => match host_port.rsplit_once(':') {
                Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid_port())?),
                None => (host_port, DEFAULT_PORT),
            },
        };

        if host.is_empty() {
            return Err(MemcacheError::Config(format!(
                "missing host in server entry '{}'",
                entry
            )));
        }

        let mut server = ServerConfig::new(host, port);
        if let Some(user_pass) = user_pass {
            let (username, password) = user_pass.split_once(':').unwrap_or((user_pass, ""));
            server = server.with_credentials(username, password);
        }
        parsed.push(server);
    }

    if parsed.is_empty() {
        return Err(MemcacheError::Config("empty server list".to_string()));
    }
    Ok(parsed)
}

/// Server list from `MEMCACHIER_SERVERS`, `MEMCACHE_SERVERS`, or the default
pub fn servers_from_env() -> String {
    first_env(&SERVERS_ENV).unwrap_or_else(|| DEFAULT_SERVERS.to_string())
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.is_empty())
}
