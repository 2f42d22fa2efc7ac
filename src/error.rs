//! Error types for memkv
//!
//! Provides a unified error type for all client operations.
//!
//! Errors are `Clone` because a single connection failure is delivered to
//! every request that was outstanding on that connection.

use std::sync::Arc;

use thiserror::Error;

use crate::protocol::Status;

/// Result type alias using MemcacheError
pub type Result<T> = std::result::Result<T, MemcacheError>;

/// Unified error type for memkv operations
#[derive(Debug, Clone, Error)]
pub enum MemcacheError {
    // -------------------------------------------------------------------------
    // Transport Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("socket closed unexpectedly")]
    ConnectionClosed,

    #[error("socket timed out waiting on response")]
    Timeout,

    #[error("socket timed out connecting to server")]
    ConnectTimeout,

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Well-formed response carrying a status the command treats as failure.
    #[error("{command}: {}", .status.description())]
    Status {
        command: &'static str,
        status: Status,
    },

    // -------------------------------------------------------------------------
    // Authentication Errors
    // -------------------------------------------------------------------------
    #[error("Authentication failed: {0}")]
    Authentication(String),

    // -------------------------------------------------------------------------
    // Routing Errors
    // -------------------------------------------------------------------------
    #[error("No servers available")]
    NoServerAvailable,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MemcacheError {
    /// Whether the failing operation may be resubmitted.
    ///
    /// Transport and protocol failures are retried at the call site that saw
    /// them; status, authentication and routing failures never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemcacheError::Io(_)
                | MemcacheError::ConnectionClosed
                | MemcacheError::Timeout
                | MemcacheError::ConnectTimeout
                | MemcacheError::Protocol(_)
        )
    }

    /// The response status, for status errors.
    pub fn status(&self) -> Option<Status> {
        match self {
            MemcacheError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MemcacheError {
    fn from(err: std::io::Error) -> Self {
        MemcacheError::Io(Arc::new(err))
    }
}
