//! Key -> server selection

use std::hash::Hasher;

use fnv::FnvHasher;

/// Chooses the server key responsible for a cache key
///
/// Receives the current list of server keys (not connections) so an
/// implementation can leave nodes out without the client knowing why.
/// Returning `None` means no node can serve the key.
///
/// Implementations should be deterministic for a fixed server list. Any
/// expensive setup belongs in the implementation's constructor or behind a
/// lazy cell, not in `select`.
pub trait ServerSelector: Send + Sync {
    fn select(&self, server_keys: &[String], key: &[u8]) -> Option<String>;
}

impl<F> ServerSelector for F
where
    F: Fn(&[String], &[u8]) -> Option<String> + Send + Sync,
{
    fn select(&self, server_keys: &[String], key: &[u8]) -> Option<String> {
        self(server_keys, key)
    }
}

/// `fnv1a(key) mod server_count`
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuloSelector;

impl ServerSelector for ModuloSelector {
    fn select(&self, server_keys: &[String], key: &[u8]) -> Option<String> {
        match server_keys.len() {
            0 => None,
            1 => Some(server_keys[0].clone()),
            count => {
                let index = (hash_key(key) % count as u64) as usize;
                Some(server_keys[index].clone())
            }
        }
    }
}

/// 64-bit FNV-1a of the key bytes
pub fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(key);
    hasher.finish()
}
