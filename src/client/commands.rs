//! Single-key commands
//!
//! Every command goes through `Client::execute`; what differs between them
//! is the request layout and which non-success statuses mean "did not
//! apply" rather than failure.

use crate::error::Result;
use crate::protocol::{
    counter_extras, decode_counter, encode_request, expiration_extras, store_extras, Message,
    Opcode, Status,
};
use super::{check_key, status_error, Client, Item};

/// A command's opcode and status table
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Name used in errors and logs
    pub name: &'static str,
    pub opcode: Opcode,
    /// Statuses reported as a negative result (`false` / `None`) instead of an error
    pub benign: &'static [Status],
}

pub(crate) const GET: CommandSpec = CommandSpec {
    name: "GET",
    opcode: Opcode::Get,
    benign: &[Status::KeyNotFound],
};

pub(crate) const SET: CommandSpec = CommandSpec {
    name: "SET",
    opcode: Opcode::Set,
    benign: &[],
};

/// SET guarded by a CAS token: a lost race is an answer, not a failure
pub(crate) const SET_CAS: CommandSpec = CommandSpec {
    name: "SET",
    opcode: Opcode::Set,
    benign: &[Status::KeyExists],
};

pub(crate) const ADD: CommandSpec = CommandSpec {
    name: "ADD",
    opcode: Opcode::Add,
    benign: &[Status::KeyExists, Status::ItemNotStored],
};

pub(crate) const REPLACE: CommandSpec = CommandSpec {
    name: "REPLACE",
    opcode: Opcode::Replace,
    benign: &[Status::KeyNotFound, Status::ItemNotStored],
};

pub(crate) const REPLACE_CAS: CommandSpec = CommandSpec {
    name: "REPLACE",
    opcode: Opcode::Replace,
    benign: &[Status::KeyNotFound, Status::ItemNotStored, Status::KeyExists],
};

pub(crate) const DELETE: CommandSpec = CommandSpec {
    name: "DELETE",
    opcode: Opcode::Delete,
    benign: &[Status::KeyNotFound],
};

pub(crate) const INCREMENT: CommandSpec = CommandSpec {
    name: "INCREMENT",
    opcode: Opcode::Increment,
    benign: &[],
};

pub(crate) const DECREMENT: CommandSpec = CommandSpec {
    name: "DECREMENT",
    opcode: Opcode::Decrement,
    benign: &[],
};

pub(crate) const APPEND: CommandSpec = CommandSpec {
    name: "APPEND",
    opcode: Opcode::Append,
    benign: &[Status::KeyNotFound, Status::ItemNotStored],
};

pub(crate) const PREPEND: CommandSpec = CommandSpec {
    name: "PREPEND",
    opcode: Opcode::Prepend,
    benign: &[Status::KeyNotFound, Status::ItemNotStored],
};

pub(crate) const TOUCH: CommandSpec = CommandSpec {
    name: "TOUCH",
    opcode: Opcode::Touch,
    benign: &[Status::KeyNotFound],
};

/// Options for SET / ADD / REPLACE
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Expiration in seconds; the client default when `None`
    pub expires: Option<u32>,
    /// Only store if the item's CAS still matches (SET and REPLACE)
    pub cas: Option<u64>,
    pub flags: u32,
}

impl StoreOptions {
    pub fn expires(mut self, seconds: u32) -> Self {
        self.expires = Some(seconds);
        self
    }

    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = Some(cas);
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }
}

/// Options for INCREMENT / DECREMENT
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterOptions {
    /// Value stored when the counter does not exist yet
    pub initial: u64,
    /// Expiration in seconds; the client default when `None`
    pub expires: Option<u32>,
}

impl CounterOptions {
    pub fn initial(mut self, initial: u64) -> Self {
        self.initial = initial;
        self
    }

    pub fn expires(mut self, seconds: u32) -> Self {
        self.expires = Some(seconds);
        self
    }
}

/// Result of `Client::execute`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The server answered `Success`
    Applied(Message),
    /// The server answered with one of the command's benign statuses
    NotApplied(Status),
}

impl Outcome {
    pub fn applied(&self) -> bool {
        matches!(self, Outcome::Applied(_))
    }
}

impl Client {
    /// Encode, route, send (with retries) and classify the response status
    /// against `spec`
    ///
    /// The building block of every single-key command; also usable for
    /// opcodes the client has no dedicated method for.
    pub async fn execute(
        &self,
        spec: &CommandSpec,
        key: &[u8],
        extras: &[u8],
        value: &[u8],
        cas: u64,
    ) -> Result<Outcome> {
        check_key(key)?;
        let seq = self.next_sequence();
        let request = encode_request(spec.opcode, key, extras, value, seq, cas);
        let response = self.perform(key, request, seq).await?;

        match response.status() {
            Status::Success => Ok(Outcome::Applied(response)),
            status if spec.benign.contains(&status) => Ok(Outcome::NotApplied(status)),
            status => Err(status_error(spec.name, status)),
        }
    }

    fn expiration(&self, expires: Option<u32>) -> u32 {
        expires.unwrap_or(self.config.expires)
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Fetch `key`; `None` on a miss
    pub async fn get(&self, key: impl AsRef<[u8]>) -> Result<Option<Item>> {
        match self.execute(&GET, key.as_ref(), &[], &[], 0).await? {
            Outcome::Applied(message) => Ok(Some(Item::from(message))),
            Outcome::NotApplied(_) => Ok(None),
        }
    }

    // =========================================================================
    // Storage
    // =========================================================================

    /// Store unconditionally, or only if the CAS token matches.
    ///
    /// Returns `false` when a CAS-guarded store lost the race.
    pub async fn set(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        options: StoreOptions,
    ) -> Result<bool> {
        let spec = if options.cas.is_some() { &SET_CAS } else { &SET };
        let extras = store_extras(options.flags, self.expiration(options.expires));
        let outcome = self
            .execute(spec, key.as_ref(), &extras, value.as_ref(), options.cas.unwrap_or(0))
            .await?;
        Ok(outcome.applied())
    }

    /// Store only if `key` does not exist; `false` if it does
    pub async fn add(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        options: StoreOptions,
    ) -> Result<bool> {
        let extras = store_extras(options.flags, self.expiration(options.expires));
        let outcome = self
            .execute(&ADD, key.as_ref(), &extras, value.as_ref(), 0)
            .await?;
        Ok(outcome.applied())
    }

    /// Store only if `key` exists; `false` if it does not
    pub async fn replace(
        &self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
        options: StoreOptions,
    ) -> Result<bool> {
        let spec = if options.cas.is_some() { &REPLACE_CAS } else { &REPLACE };
        let extras = store_extras(options.flags, self.expiration(options.expires));
        let outcome = self
            .execute(spec, key.as_ref(), &extras, value.as_ref(), options.cas.unwrap_or(0))
            .await?;
        Ok(outcome.applied())
    }

    /// Remove `key`; `false` if it did not exist
    pub async fn delete(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        let outcome = self.execute(&DELETE, key.as_ref(), &[], &[], 0).await?;
        Ok(outcome.applied())
    }

    /// Append to an existing value; `false` if `key` does not exist
    pub async fn append(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<bool> {
        let outcome = self
            .execute(&APPEND, key.as_ref(), &[], value.as_ref(), 0)
            .await?;
        Ok(outcome.applied())
    }

    /// Prepend to an existing value; `false` if `key` does not exist
    pub async fn prepend(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<bool> {
        let outcome = self
            .execute(&PREPEND, key.as_ref(), &[], value.as_ref(), 0)
            .await?;
        Ok(outcome.applied())
    }

    /// Reset the expiration of `key`; `false` if it does not exist
    pub async fn touch(&self, key: impl AsRef<[u8]>, expires: u32) -> Result<bool> {
        let extras = expiration_extras(expires);
        let outcome = self.execute(&TOUCH, key.as_ref(), &extras, &[], 0).await?;
        Ok(outcome.applied())
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Add `amount` to a counter and return the new value
    pub async fn increment(
        &self,
        key: impl AsRef<[u8]>,
        amount: u64,
        options: CounterOptions,
    ) -> Result<u64> {
        self.counter(&INCREMENT, key.as_ref(), amount, options).await
    }

    /// Subtract `amount` from a counter (the server floors at zero) and
    /// return the new value
    pub async fn decrement(
        &self,
        key: impl AsRef<[u8]>,
        amount: u64,
        options: CounterOptions,
    ) -> Result<u64> {
        self.counter(&DECREMENT, key.as_ref(), amount, options).await
    }

    async fn counter(
        &self,
        spec: &CommandSpec,
        key: &[u8],
        amount: u64,
        options: CounterOptions,
    ) -> Result<u64> {
        let extras = counter_extras(amount, options.initial, self.expiration(options.expires));
        match self.execute(spec, key, &extras, &[], 0).await? {
            Outcome::Applied(message) => decode_counter(&message.value),
            Outcome::NotApplied(status) => Err(status_error(spec.name, status)),
        }
    }
}
