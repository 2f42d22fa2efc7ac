//! Request/response correlation
//!
//! Matches inbound messages to outstanding requests by opaque and keeps the
//! per-request deadlines. Owned by a single connection task, so nothing here
//! is synchronized.

use std::collections::{HashMap, VecDeque};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::{MemcacheError, Result};
use crate::protocol::Message;

/// Where the response(s) for one opaque go
#[derive(Debug)]
pub enum ResponseHandler {
    /// Exactly one response; the entry is removed once it arrives.
    Once(oneshot::Sender<Result<Message>>),

    /// Any number of responses sharing the opaque, ended by a response with
    /// an empty body or an error status.
    Quiet(mpsc::UnboundedSender<Result<Message>>),
}

impl ResponseHandler {
    pub(crate) fn deliver(self, result: Result<Message>) {
        // A closed receiver means the caller stopped waiting.
        match self {
            ResponseHandler::Once(tx) => {
                let _ = tx.send(result);
            }
            ResponseHandler::Quiet(tx) => {
                let _ = tx.send(result);
            }
        }
    }
}

/// Outcome of dispatching one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to a quiet handler that expects more.
    Delivered,
    /// Handed over and the entry removed.
    Completed,
    /// Nothing registered under the opaque; the message was dropped.
    Unmatched,
}

/// Outstanding requests and their deadlines
///
/// Responses on one stream arrive in write order, so deadlines are kept as a
/// FIFO and popped once per completed entry regardless of which opaque
/// completed.
#[derive(Debug, Default)]
pub struct Correlator {
    /// Outstanding handlers by opaque
    handlers: HashMap<u32, ResponseHandler>,

    /// One deadline per outstanding handler, in write order
    deadlines: VecDeque<Instant>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler and the deadline of the write that will answer it
    pub fn register(&mut self, opaque: u32, handler: ResponseHandler, deadline: Instant) {
        if let Some(displaced) = self.handlers.insert(opaque, handler) {
            tracing::warn!(opaque, "opaque reused while a request was outstanding");
            self.deadlines.pop_front();
            displaced.deliver(Err(MemcacheError::Protocol(format!(
                "opaque {} reused while outstanding",
                opaque
            ))));
        }
        self.deadlines.push_back(deadline);
    }

    /// Route a message to the handler registered under its opaque
    pub fn dispatch(&mut self, message: Message) -> Dispatch {
        let opaque = message.opaque();
        let completes = match self.handlers.get(&opaque) {
            None => return Dispatch::Unmatched,
            Some(ResponseHandler::Once(_)) => true,
            Some(ResponseHandler::Quiet(_)) => message.ends_quiet_stream(),
        };

        if !completes {
            if let Some(ResponseHandler::Quiet(tx)) = self.handlers.get(&opaque) {
                let _ = tx.send(Ok(message));
            }
            return Dispatch::Delivered;
        }

        match self.handlers.remove(&opaque) {
            Some(handler) => {
                self.deadlines.pop_front();
                handler.deliver(Ok(message));
                Dispatch::Completed
            }
            None => Dispatch::Unmatched,
        }
    }

    /// Forget the handler under `opaque` without notifying it
    ///
    /// Used when the caller abandons a quiet stream early. A late response
    /// for the opaque is then dropped as unmatched.
    pub fn cancel(&mut self, opaque: u32) -> bool {
        match self.handlers.remove(&opaque) {
            Some(_) => {
                self.deadlines.pop_front();
                true
            }
            None => false,
        }
    }

    /// Fail every outstanding request once and forget all state
    ///
    /// Returns how many handlers were notified.
    pub fn fail_all(&mut self, err: &MemcacheError) -> usize {
        self.deadlines.clear();
        let handlers: Vec<ResponseHandler> = self.handlers.drain().map(|(_, h)| h).collect();
        let count = handlers.len();
        for handler in handlers {
            handler.deliver(Err(err.clone()));
        }
        count
    }

    /// Earliest outstanding deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.front().copied()
    }

    /// Whether the earliest deadline has passed
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.next_deadline(), Some(deadline) if deadline <= now)
    }

    pub fn outstanding(&self) -> usize {
        self.handlers.len()
    }

    pub fn pending_deadlines(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_idle(&self) -> bool {
        self.handlers.is_empty()
    }
}
