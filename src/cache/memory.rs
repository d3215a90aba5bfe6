//! In-process TTL cache with a capacity bound and a lock deadline.
//!
//! At capacity, expired entries are swept first and then the entry closest
//! to expiry is evicted, so writes never fail for lack of room. Evicting a
//! rate-limit window or a fingerprint only softens that check.
//! Used by: state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use super::Cache;
use crate::clock::Clock;
use crate::error::{deadline_err, Result};

const DEFAULT_MAX_CAPACITY: usize = 100_000;
const DEFAULT_DEADLINE: StdDuration = StdDuration::from_millis(250);
const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 3600;

struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    max_capacity: usize,
    deadline: StdDuration,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, DEFAULT_MAX_CAPACITY, DEFAULT_DEADLINE)
    }

    pub fn with_limits(clock: Arc<dyn Clock>, max_capacity: usize, deadline: StdDuration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            max_capacity,
            deadline,
        }
    }

    fn cleanup_expired_inner(entries: &mut HashMap<String, Entry>, now: DateTime<Utc>) {
        entries.retain(|_, e| e.expires_at > now);
    }

    fn evict_soonest_inner(entries: &mut HashMap<String, Entry>) {
        let soonest = entries
            .iter()
            .min_by_key(|(_, e)| e.expires_at)
            .map(|(k, _)| k.clone());
        if let Some(key) = soonest {
            entries.remove(&key);
            tracing::debug!(key = %key, "cache full, evicted entry closest to expiry");
        }
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let mut entries = self.entries.try_lock_for(self.deadline).ok_or_else(|| deadline_err("cache"))?;
        match entries.get(key) {
            Some(e) if e.expires_at > now => Ok(Some(e.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let now = self.clock.now();
        let ttl = Duration::seconds(ttl_seconds.min(MAX_TTL_SECONDS) as i64);
        let mut entries = self.entries.try_lock_for(self.deadline).ok_or_else(|| deadline_err("cache"))?;
        if !entries.contains_key(key) && entries.len() >= self.max_capacity {
            Self::cleanup_expired_inner(&mut entries, now);
            while !entries.is_empty() && entries.len() >= self.max_capacity {
                Self::evict_soonest_inner(&mut entries);
            }
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.try_lock_for(self.deadline).ok_or_else(|| deadline_err("cache"))?;
        entries.remove(key);
        Ok(())
    }
}
