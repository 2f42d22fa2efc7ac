//! Network Module
//!
//! One connection per cache node.
//!
//! ## Architecture
//! - One tokio task per node owns the socket, read buffer and correlation table
//! - Callers talk to the task over a channel and get responses back on
//!   per-request channels
//! - Responses are matched to requests by opaque; deadlines are tracked FIFO
//!   with a single timer armed for the earliest one
//! - Any transport/protocol error or timeout fails every outstanding request
//!   on that node and drops the socket

mod auth;
mod connection;
mod correlator;

pub use auth::{authenticate, plain_auth_request};
pub use connection::{Connection, ConnectionConfig, ConnectionState, QuietResponses};
pub use correlator::{Correlator, Dispatch, ResponseHandler};
