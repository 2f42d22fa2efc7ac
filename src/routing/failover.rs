//! Failover: temporarily excluding failed nodes from selection

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::MemcacheError;
use super::selector::{ModuloSelector, ServerSelector};

/// Called once an operation has exhausted its retries against a node
///
/// The client re-runs selection afterwards and makes one more attempt, so a
/// hook that makes the selector skip `server_key` moves the key elsewhere.
pub trait FailoverHook: Send + Sync {
    fn on_failure(&self, server_key: &str, error: &MemcacheError);
}

impl<F> FailoverHook for F
where
    F: Fn(&str, &MemcacheError) + Send + Sync,
{
    fn on_failure(&self, server_key: &str, error: &MemcacheError) {
        self(server_key, error)
    }
}

/// Selector that skips nodes reported through its `FailoverHook` side
/// until their exclusion window has passed
pub struct FailoverSelector<S = ModuloSelector> {
    inner: S,
    exclusion: Duration,
    /// server key -> excluded until
    failed: Mutex<HashMap<String, Instant>>,
}

impl FailoverSelector<ModuloSelector> {
    pub fn new(exclusion: Duration) -> Self {
        Self::with_selector(ModuloSelector, exclusion)
    }
}

impl<S: ServerSelector> FailoverSelector<S> {
    pub fn with_selector(inner: S, exclusion: Duration) -> Self {
        Self {
            inner,
            exclusion,
            failed: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `server_key` is currently excluded
    pub fn is_excluded(&self, server_key: &str) -> bool {
        let failed = self.failed.lock();
        matches!(failed.get(server_key), Some(until) if *until > Instant::now())
    }

    /// Put `server_key` back into rotation
    pub fn restore(&self, server_key: &str) {
        self.failed.lock().remove(server_key);
    }
}

impl<S: ServerSelector> ServerSelector for FailoverSelector<S> {
    fn select(&self, server_keys: &[String], key: &[u8]) -> Option<String> {
        let alive: Vec<String> = {
            let mut failed = self.failed.lock();
            let now = Instant::now();
            failed.retain(|_, until| *until > now);
            if failed.is_empty() {
                return self.inner.select(server_keys, key);
            }
            server_keys
                .iter()
                .filter(|server_key| !failed.contains_key(server_key.as_str()))
                .cloned()
                .collect()
        };
        self.inner.select(&alive, key)
    }
}

impl<S: ServerSelector> FailoverHook for FailoverSelector<S> {
    fn on_failure(&self, server_key: &str, error: &MemcacheError) {
        tracing::warn!(
            server = server_key,
            error = %error,
            exclusion_ms = self.exclusion.as_millis() as u64,
            "excluding failed server"
        );
        self.failed
            .lock()
            .insert(server_key.to_string(), Instant::now() + self.exclusion);
    }
}
