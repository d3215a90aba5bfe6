//! Append-only audit trail of view-count increment attempts.
//! Used by: validator, abuse, handlers::attempts, state.

pub mod sqlite;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::error::Result;

pub const INTERNAL_ERROR_REASON: &str = "internal error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewCountAttempt {
    pub id: i64,
    pub content_id: String,
    pub ip: String,
    pub user_agent: String,
    pub success: bool,
    pub reason: String,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewAttempt<'a> {
    pub content_id: &'a str,
    pub ip: &'a str,
    pub user_agent: &'a str,
    pub success: bool,
    pub reason: &'a str,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpSummary {
    pub ip: String,
    pub total_attempts: u64,
    pub failed_attempts: u64,
}

/// Durable storage for attempts. Records are never updated or deleted here.
pub trait AttemptStore: Send + Sync {
    fn append(&self, attempt: &NewAttempt<'_>) -> Result<i64>;

    fn recent(&self, limit: usize) -> Result<Vec<ViewCountAttempt>>;

    /// Attempts from `ip` with `since <= attempted_at < until`, oldest first.
    fn for_ip(&self, ip: &str, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<ViewCountAttempt>>;

    /// Per-IP totals for attempts at or after `since`.
    fn summarize_by_ip(&self, since: DateTime<Utc>) -> Result<Vec<IpSummary>>;
}

/// Writes attempts without ever failing the caller.
pub struct AttemptRecorder {
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
}

impl AttemptRecorder {
    pub fn new(store: Arc<dyn AttemptStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Returns the new record id, or `None` if the write failed and was logged.
    pub fn record(&self, content_id: &str, ip: &str, user_agent: &str, success: bool, reason: &str) -> Option<i64> {
        let reason = if reason.trim().is_empty() { "unspecified" } else { reason };
        let attempt = NewAttempt {
            content_id,
            ip,
            user_agent,
            success,
            reason,
            attempted_at: self.clock.now(),
        };
        match self.store.append(&attempt) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(
                    content_id = %content_id,
                    ip = %ip,
                    success,
                    reason = %reason,
                    error = %e,
                    "failed to record view count attempt"
                );
                None
            }
        }
    }

    /// Opens an attempt that is recorded exactly once: by [`PendingAttempt::finish`],
    /// or as an internal error if the guard is dropped unfinished (early return, panic).
    pub fn begin(&self, content_id: &str, ip: &str, user_agent: &str) -> PendingAttempt<'_> {
        PendingAttempt {
            recorder: self,
            content_id: content_id.to_owned(),
            ip: ip.to_owned(),
            user_agent: user_agent.to_owned(),
            finished: false,
        }
    }
}

pub struct PendingAttempt<'a> {
    recorder: &'a AttemptRecorder,
    content_id: String,
    ip: String,
    user_agent: String,
    finished: bool,
}

impl PendingAttempt<'_> {
    pub fn finish(mut self, success: bool, reason: &str) -> Option<i64> {
        self.finished = true;
        self.recorder
            .record(&self.content_id, &self.ip, &self.user_agent, success, reason)
    }
}

impl Drop for PendingAttempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.recorder
                .record(&self.content_id, &self.ip, &self.user_agent, false, INTERNAL_ERROR_REASON);
        }
    }
}
