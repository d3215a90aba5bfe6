//! Shared key-value cache port with per-entry TTL.
//! Used by: ratelimit, dedup, state.

pub mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// A multi-writer cache shared by every request handler.
///
/// Values are small serialized blobs. Implementations must fail with an
/// error, never block indefinitely, when the backend cannot be reached.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

pub fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Result<Option<T>> {
    match cache.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn set_json<T: Serialize>(cache: &dyn Cache, key: &str, value: &T, ttl_seconds: u64) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    cache.set(key, &raw, ttl_seconds)
}
