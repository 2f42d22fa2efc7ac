//! Routing Module
//!
//! Maps cache keys to server keys (`host:port`).
//!
//! - `ModuloSelector`: FNV-1a hash of the key modulo the server count; the
//!   default, stable for a fixed server list
//! - `FailoverSelector`: wraps another selector and skips nodes reported
//!   failed through its `FailoverHook` implementation
//! - Any `Fn(&[String], &[u8]) -> Option<String>` is a selector, and any
//!   `Fn(&str, &MemcacheError)` is a failover hook

mod selector;
mod failover;

pub use selector::{hash_key, ModuloSelector, ServerSelector};
pub use failover::{FailoverHook, FailoverSelector};
