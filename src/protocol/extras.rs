//! Extras section layouts for the commands that carry one

use crate::error::{MemcacheError, Result};

/// SET/ADD/REPLACE extras: flags (4) + expiration (4)
pub fn store_extras(flags: u32, expires: u32) -> [u8; 8] {
    let mut extras = [0u8; 8];
    extras[..4].copy_from_slice(&flags.to_be_bytes());
    extras[4..].copy_from_slice(&expires.to_be_bytes());
    extras
}

/// TOUCH extras: expiration (4)
pub fn expiration_extras(expires: u32) -> [u8; 4] {
    expires.to_be_bytes()
}

/// INCREMENT/DECREMENT extras: amount (8) + initial (8) + expiration (4)
pub fn counter_extras(amount: u64, initial: u64, expires: u32) -> [u8; 20] {
    let mut extras = [0u8; 20];
    extras[..8].copy_from_slice(&amount.to_be_bytes());
    extras[8..16].copy_from_slice(&initial.to_be_bytes());
    extras[16..].copy_from_slice(&expires.to_be_bytes());
    extras
}

/// Decode the 8-byte counter value of an INCREMENT/DECREMENT response
pub fn decode_counter(value: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = value.try_into().map_err(|_| {
        MemcacheError::Protocol(format!(
            "Counter response: expected 8 bytes, got {}",
            value.len()
        ))
    })?;
    Ok(u64::from_be_bytes(bytes))
}
