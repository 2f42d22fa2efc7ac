//! # memkv
//!
//! An asynchronous memcached client speaking the binary protocol, with:
//! - Request pipelining over one socket per node
//! - Opaque-based response correlation and per-request deadlines
//! - Key hashing across nodes, bounded retries and optional failover
//! - SASL PLAIN authentication
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Client                              │
//! │        (commands, multi-get fan-out, retry, failover)        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ key ──▶ ServerSelector ──▶ server key
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Connection  │   ...    │ Connection  │   one tokio task per node
//!   │ (Correlator)│          │ (Correlator)│
//!   └──────┬──────┘          └──────┬──────┘
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────────────────────────────┐
//!   │     Protocol (encode / parse)        │
//!   └─────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use memkv::{Client, ClientConfig, StoreOptions};
//!
//! # async fn demo() -> memkv::Result<()> {
//! let client = Client::create(Some("localhost:11211"), ClientConfig::default())?;
//! client.set("hello", "world", StoreOptions::default()).await?;
//! let item = client.get("hello").await?;
//! assert_eq!(item.map(|item| item.value), Some("world".into()));
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod network;
pub mod routing;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{MemcacheError, Result};
pub use config::{ClientConfig, ServerConfig};
pub use client::{
    Client, CounterOptions, Item, MultiGetResult, NodeError, NodeResults, Stats, StoreOptions,
};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of memkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
