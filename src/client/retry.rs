//! Bounded retry

use std::future::Future;
use std::time::Duration;

use tokio::time;

use crate::error::{MemcacheError, Result};

/// How many times an operation is attempted against one node, and how long
/// to wait between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (at least one is always made)
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Run `attempt` until it succeeds, fails with a non-retryable error, or
    /// the budget is spent. The last error is returned as-is.
    pub async fn run<T, F, Fut>(&self, server_key: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut remaining = attempts;

        loop {
            remaining -= 1;
            let err = match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.is_retryable() && remaining > 0 {
                tracing::debug!(server = server_key, error = %err, remaining, "retrying request");
                time::sleep(self.delay).await;
                continue;
            }

            if !matches!(err, MemcacheError::Status { .. }) {
                tracing::warn!(
                    server = server_key,
                    attempts,
                    error = %err,
                    "server failed after retries"
                );
            }
            return Err(err);
        }
    }
}
