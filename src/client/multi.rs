//! Multi-get
//!
//! Keys are grouped by node. Each node receives one pipeline of quiet
//! GETKQ requests closed by a NOOP, all under a single opaque: hits stream
//! back keyed, misses stay silent, and the NOOP reply marks the end.
//!
//! ```text
//! ┌────────┬────────┬─────┬────────┬──────┐
//! │ GETKQ  │ GETKQ  │ ... │ GETKQ  │ NOOP │   one write, one opaque
//! └────────┴────────┴─────┴────────┴──────┘
//! ```

use std::collections::{HashMap, HashSet};

use tokio::task::JoinSet;

use crate::error::{MemcacheError, Result};
use crate::network::{Connection, QuietResponses};
use crate::protocol::{encode_request_into, Opcode, Status};
use super::{check_key, status_error, Client, Item, RetryPolicy};

const COMMAND: &str = "GET";

/// A node that could not answer its share of a multi-get
#[derive(Debug, Clone)]
pub struct NodeError {
    pub server_key: String,
    /// Keys routed to the node, whose values are therefore unknown
    pub keys: Vec<String>,
    pub error: MemcacheError,
}

/// Outcome of `Client::get_multi_with_errors`
#[derive(Debug, Clone, Default)]
pub struct MultiGetResult {
    /// Hits from every node that answered
    pub values: HashMap<String, Item>,
    pub errors: Vec<NodeError>,
}

impl MultiGetResult {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Client {
    /// Fetch many keys at once; missing keys are absent from the map
    ///
    /// Fails with the first node error encountered.
    pub async fn get_multi<K: AsRef<str>>(&self, keys: &[K]) -> Result<HashMap<String, Item>> {
        let result = self.get_multi_with_errors(keys).await?;
        match result.errors.into_iter().next() {
            Some(node_error) => Err(node_error.error),
            None => Ok(result.values),
        }
    }

    /// Fetch many keys at once, keeping the hits of nodes that answered
    /// when others fail
    ///
    /// Routing failures are still returned as an error for the whole call.
    pub async fn get_multi_with_errors<K: AsRef<str>>(&self, keys: &[K]) -> Result<MultiGetResult> {
        let partitions = self.partition(keys)?;
        let policy = self.retry_policy();
        let mut tasks = JoinSet::new();

        for (connection, keys) in partitions {
            let seq = self.next_sequence();
            tasks.spawn(fetch_from_node(connection, keys, seq, policy));
        }

        let mut result = MultiGetResult::default();
        while let Some(joined) = tasks.join_next().await {
            let (server_key, keys, fetched) = match joined {
                Ok(output) => output,
                Err(join_err) if join_err.is_panic() => std::panic::resume_unwind(join_err.into_panic()),
                Err(_) => return Err(MemcacheError::ConnectionClosed),
            };
            match fetched {
                Ok(values) => result.values.extend(values),
                Err(error) => result.errors.push(NodeError {
                    server_key,
                    keys,
                    error,
                }),
            }
        }
        Ok(result)
    }

    /// Group `keys` by node, dropping duplicates
    fn partition<K: AsRef<str>>(&self, keys: &[K]) -> Result<Vec<(Connection, Vec<String>)>> {
        let mut partitions: Vec<(Connection, Vec<String>)> = Vec::new();
        let mut slots: HashMap<&str, usize> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for key in keys {
            let key = key.as_ref();
            if !seen.insert(key) {
                continue;
            }
            check_key(key.as_bytes())?;
            let connection = self.route(key.as_bytes())?;

            let slot = *slots.entry(connection.server_key()).or_insert_with(|| {
                partitions.push((connection.clone(), Vec::new()));
                partitions.len() - 1
            });
            partitions[slot].1.push(key.to_string());
        }
        Ok(partitions)
    }
}

/// One node's share of a multi-get, retried as a whole
async fn fetch_from_node(
    connection: Connection,
    keys: Vec<String>,
    seq: u32,
    policy: RetryPolicy,
) -> (String, Vec<String>, Result<HashMap<String, Item>>) {
    let request = pipeline(&keys, seq);
    let fetched = policy
        .run(connection.server_key(), || {
            let responses = connection.send_quiet(seq, request.clone());
            async move { collect(responses?).await }
        })
        .await;
    (connection.server_key().to_string(), keys, fetched)
}

/// N x GETKQ followed by NOOP, all carrying `seq`
fn pipeline(keys: &[String], seq: u32) -> Vec<u8> {
    let mut request = Vec::new();
    for key in keys {
        encode_request_into(&mut request, Opcode::GetKQ, key.as_bytes(), &[], &[], seq, 0);
    }
    encode_request_into(&mut request, Opcode::NoOp, &[], &[], &[], seq, 0);
    request
}

async fn collect(mut responses: QuietResponses) -> Result<HashMap<String, Item>> {
    let mut values = HashMap::new();

    while let Some(response) = responses.next().await {
        let message = response?;
        match message.status() {
            Status::Success => {}
            Status::KeyNotFound => continue,
            status => return Err(status_error(COMMAND, status)),
        }

        match message.opcode() {
            Opcode::NoOp => return Ok(values),
            Opcode::GetK | Opcode::GetKQ => {
                if message.key.is_empty() {
                    return Err(MemcacheError::Protocol(
                        "multi-get response without a key".to_string(),
                    ));
                }
                let key = String::from_utf8_lossy(&message.key).into_owned();
                values.insert(key, Item::from(message));
            }
            opcode => {
                return Err(MemcacheError::Protocol(format!(
                    "unexpected {:?} response in multi-get",
                    opcode
                )))
            }
        }
    }
    Err(MemcacheError::ConnectionClosed)
}
