//! Commands addressed to nodes rather than keys

use std::collections::HashMap;
use std::future::Future;

use tokio::task::JoinSet;

use crate::error::{MemcacheError, Result};
use crate::network::Connection;
use crate::protocol::{encode_request, Message, Opcode, Status};
use super::{status_error, Client, NodeResults, RetryPolicy};

/// Stat name -> value, as reported by one node
pub type Stats = HashMap<String, String>;

impl Client {
    /// Run `op` against every node concurrently and collect the outcomes
    async fn broadcast<T, F, Fut>(&self, op: F) -> NodeResults<T>
    where
        F: Fn(Connection) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for server_key in &self.server_keys {
            if let Some(connection) = self.connections.get(server_key) {
                let server_key = server_key.clone();
                let pending = op(connection.clone());
                tasks.spawn(async move { (server_key, pending.await) });
            }
        }

        let mut results = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((server_key, result)) => {
                    results.insert(server_key, result);
                }
                Err(join_err) if join_err.is_panic() => {
                    std::panic::resume_unwind(join_err.into_panic())
                }
                Err(_) => {}
            }
        }
        results
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Invalidate every item on every node
    ///
    /// Maps each server key to whether it acknowledged; fails with the last
    /// node error if any node did not.
    pub async fn flush(&self) -> Result<HashMap<String, bool>> {
        let seq = self.next_sequence();
        let request = encode_request(Opcode::Flush, &[], &[], &[], seq, 0);

        let results = self
            .broadcast(|connection| {
                let request = request.clone();
                async move {
                    let response = connection.send(seq, request).await?;
                    expect_success("FLUSH", &response)?;
                    Ok::<_, MemcacheError>(true)
                }
            })
            .await;

        let mut flushed = HashMap::new();
        let mut last_error = None;
        for (server_key, result) in results {
            match result {
                Ok(acknowledged) => {
                    flushed.insert(server_key, acknowledged);
                }
                Err(err) => {
                    flushed.insert(server_key, false);
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(flushed),
        }
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// General statistics of every node
    pub async fn stats(&self) -> NodeResults<Stats> {
        self.stats_with_key("").await
    }

    /// A statistics group (`"items"`, `"slabs"`, `"settings"`, ...) of every node
    pub async fn stats_with_key(&self, key: &str) -> NodeResults<Stats> {
        let seq = self.next_sequence();
        let request = encode_request(Opcode::Stat, key.as_bytes(), &[], &[], seq, 0);

        self.broadcast(|connection| {
            let request = request.clone();
            async move {
                let mut responses = connection.send_quiet(seq, request)?;
                let mut stats = Stats::new();
                while let Some(response) = responses.next().await {
                    let message = response?;
                    expect_success("STAT", &message)?;
                    if message.is_terminator() {
                        return Ok(stats);
                    }
                    stats.insert(
                        String::from_utf8_lossy(&message.key).into_owned(),
                        String::from_utf8_lossy(&message.value).into_owned(),
                    );
                }
                Err(MemcacheError::ConnectionClosed)
            }
        })
        .await
    }

    /// Reset the statistics counters of every node
    pub async fn reset_stats(&self) -> NodeResults<Stats> {
        self.stats_with_key("reset").await
    }

    // =========================================================================
    // Version
    // =========================================================================

    /// Version string of the first configured node
    pub async fn version(&self) -> Result<String> {
        let connection = self
            .server_keys
            .first()
            .and_then(|server_key| self.connections.get(server_key))
            .ok_or(MemcacheError::NoServerAvailable)?;
        version_of(connection.clone(), self.next_sequence(), self.retry_policy()).await
    }

    /// Version string of every node; fails with the first node error
    pub async fn version_all(&self) -> Result<HashMap<String, String>> {
        let mut versions = HashMap::new();
        for (server_key, result) in self.version_all_with_errors().await {
            versions.insert(server_key, result?);
        }
        Ok(versions)
    }

    /// Version string or error of every node
    pub async fn version_all_with_errors(&self) -> NodeResults<String> {
        let seq = self.next_sequence();
        let policy = self.retry_policy();
        self.broadcast(|connection| version_of(connection, seq, policy))
            .await
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Ask every node to close, then close the sockets
    ///
    /// Errors are ignored; the connections are closed either way.
    pub async fn quit(&self) {
        let seq = self.next_sequence();
        let request = encode_request(Opcode::Quit, &[], &[], &[], seq, 0);

        self.broadcast(|connection| {
            let request = request.clone();
            async move {
                let acknowledged = connection.send(seq, request).await;
                connection.close();
                acknowledged.map(|_| ())
            }
        })
        .await;
    }
}

async fn version_of(connection: Connection, seq: u32, policy: RetryPolicy) -> Result<String> {
    let request = encode_request(Opcode::Version, &[], &[], &[], seq, 0);
    let response = policy
        .run(connection.server_key(), || connection.send(seq, request.clone()))
        .await?;
    expect_success("VERSION", &response)?;
    Ok(String::from_utf8_lossy(&response.value).into_owned())
}

fn expect_success(command: &'static str, message: &Message) -> Result<()> {
    match message.status() {
        Status::Success => Ok(()),
        status => Err(status_error(command, status)),
    }
}
