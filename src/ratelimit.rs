//! Sliding-window rate limiting over the shared cache.
//!
//! The limiter knows nothing about what it protects: each caller supplies a
//! [`LimiterConfig`] (global per-IP throttling, per-content view throttling,
//! session issuance throttling) and an identifier.
//!
//! The read-modify-write against the cache is not atomic. Two concurrent
//! requests for one key can both read the same window and both be admitted,
//! so the limit is soft by at most the number of racing writers.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{get_json, set_json, Cache};
use crate::clock::Clock;
use crate::error::Result;

/// Longest window a limiter will track; larger configured windows are clamped.
pub const MAX_WINDOW_SECONDS: u64 = 366 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub window_seconds: u64,
    pub max_requests: u32,
    pub cache_key_prefix: String,
    /// Admit requests when the cache cannot be read or written.
    #[serde(default)]
    pub fail_open: bool,
}

impl LimiterConfig {
    pub fn new(window_seconds: u64, max_requests: u32, cache_key_prefix: impl Into<String>) -> Self {
        Self {
            window_seconds,
            max_requests,
            cache_key_prefix: cache_key_prefix.into(),
            fail_open: false,
        }
    }

    /// One increment attempt per client per content item every 10 seconds.
    pub fn view_count() -> Self {
        Self::new(10, 1, "view_count_rl:")
    }

    pub fn global() -> Self {
        Self::new(60, 120, "global_rl:")
    }

    pub fn session_issue() -> Self {
        Self::new(300, 20, "session_rl:")
    }

    fn key(&self, identifier: &str, suffix: Option<&str>) -> String {
        match suffix {
            Some(s) => format!("{}{}:{}", self.cache_key_prefix, identifier, s),
            None => format!("{}{}", self.cache_key_prefix, identifier),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Decision {
    Admitted {
        remaining: u32,
    },
    Limited {
        requests_made: u32,
        max_requests: u32,
        window_seconds: u64,
        reset_time: DateTime<Utc>,
    },
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted { .. })
    }
}

pub struct SlidingWindowLimiter {
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(cache: Arc<dyn Cache>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    pub fn allow(&self, identifier: &str, config: &LimiterConfig) -> Result<Decision> {
        self.allow_with_suffix(identifier, None, config)
    }

    /// Checks and, when admitted, records one request for `identifier`.
    ///
    /// Cache failures propagate unless `config.fail_open` is set.
    pub fn allow_with_suffix(
        &self,
        identifier: &str,
        suffix: Option<&str>,
        config: &LimiterConfig,
    ) -> Result<Decision> {
        let now = self.clock.now();
        if config.window_seconds == 0 || config.max_requests == 0 {
            return Ok(Decision::Limited {
                requests_made: 0,
                max_requests: config.max_requests,
                window_seconds: config.window_seconds,
                reset_time: now,
            });
        }

        let key = config.key(identifier, suffix);
        match self.check_and_record(&key, now, config) {
            Ok(decision) => Ok(decision),
            Err(e) if config.fail_open => {
                tracing::warn!(key = %key, error = %e, "rate limit cache failed, admitting");
                Ok(Decision::Admitted { remaining: config.max_requests })
            }
            Err(e) => Err(e),
        }
    }

    fn check_and_record(&self, key: &str, now: DateTime<Utc>, config: &LimiterConfig) -> Result<Decision> {
        let window = Duration::seconds(config.window_seconds.min(MAX_WINDOW_SECONDS) as i64);
        let cutoff = (now - window).timestamp_millis();

        let mut stamps: Vec<i64> = get_json(self.cache.as_ref(), key)?.unwrap_or_default();
        stamps.retain(|t| *t > cutoff);
        stamps.sort_unstable();

        let made = stamps.len() as u32;
        if made >= config.max_requests {
            let oldest = stamps.first().copied().unwrap_or_else(|| now.timestamp_millis());
            let reset_time = Utc
                .timestamp_millis_opt(oldest)
                .single()
                .unwrap_or(now)
                + window;
            return Ok(Decision::Limited {
                requests_made: made,
                max_requests: config.max_requests,
                window_seconds: config.window_seconds,
                reset_time,
            });
        }

        stamps.push(now.timestamp_millis());
        set_json(self.cache.as_ref(), key, &stamps, config.window_seconds)?;
        Ok(Decision::Admitted {
            remaining: config.max_requests - stamps.len() as u32,
        })
    }
}
