//! Duplicate-view tracking in two layers.
//!
//! The session layer remembers views for the life of the session. The
//! fingerprint layer hashes (ip, user agent, content id) into a short-lived
//! cache key so that clients which drop their cookies are still recognized
//! for `ttl_seconds`. Either layer alone marks a view as a duplicate.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::cache::Cache;
use crate::error::Result;
use crate::session::SessionFlags;

pub const DEFAULT_TTL_SECONDS: u64 = 300;
const FINGERPRINT_PREFIX: &str = "view_fp:";

pub struct ViewTracker {
    cache: Arc<dyn Cache>,
    ttl_seconds: u64,
}

impl ViewTracker {
    pub fn new(cache: Arc<dyn Cache>, ttl_seconds: u64) -> Self {
        Self { cache, ttl_seconds }
    }

    pub fn already_viewed(
        &self,
        session: &dyn SessionFlags,
        ip: &str,
        user_agent: &str,
        content_id: &str,
    ) -> Result<bool> {
        if session.get_flag(&session_key(content_id)) {
            return Ok(true);
        }
        let key = cache_key(ip, user_agent, content_id);
        Ok(self.cache.get(&key)?.is_some())
    }

    pub fn mark_viewed(
        &self,
        session: &dyn SessionFlags,
        ip: &str,
        user_agent: &str,
        content_id: &str,
    ) -> Result<()> {
        session.set_flag(&session_key(content_id));
        let key = cache_key(ip, user_agent, content_id);
        self.cache.set(&key, "1", self.ttl_seconds)
    }
}

pub fn session_key(content_id: &str) -> String {
    format!("viewed_{content_id}")
}

/// Hex SHA-256 over the length-prefixed client attributes and content id.
pub fn fingerprint(ip: &str, user_agent: &str, content_id: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [ip, user_agent, content_id] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn cache_key(ip: &str, user_agent: &str, content_id: &str) -> String {
    format!("{FINGERPRINT_PREFIX}{}", fingerprint(ip, user_agent, content_id))
}
