//! Metrics tracking.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::validator::RejectKind;

#[derive(Default)]
pub struct Metrics {
    pub views_counted: AtomicU64,
    pub duplicates: AtomicU64,
    pub rejected: AtomicU64,
    pub csrf_failures: AtomicU64,
    pub rate_limited: AtomicU64,
    pub referer_failures: AtomicU64,
    pub bots_blocked: AtomicU64,
    pub crawlers_skipped: AtomicU64,
    pub infrastructure_failures: AtomicU64,
    pub audit_failures: AtomicU64,
    pub throttled: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_counted(&self) {
        self.views_counted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self, kind: RejectKind) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        let specific = match kind {
            RejectKind::Csrf => &self.csrf_failures,
            RejectKind::RateLimited => &self.rate_limited,
            RejectKind::Referer => &self.referer_failures,
            RejectKind::Infrastructure => &self.infrastructure_failures,
            RejectKind::Bot => &self.bots_blocked,
            RejectKind::Transport | RejectKind::Payload | RejectKind::NotFound => return,
        };
        specific.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bot(&self) {
        self.record_rejection(RejectKind::Bot);
    }

    pub fn record_crawler(&self) {
        self.crawlers_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audit_failure(&self) {
        self.audit_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Request turned away by the global per-IP throttle.
    pub fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            views_counted: self.views_counted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            csrf_failures: self.csrf_failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            referer_failures: self.referer_failures.load(Ordering::Relaxed),
            bots_blocked: self.bots_blocked.load(Ordering::Relaxed),
            crawlers_skipped: self.crawlers_skipped.load(Ordering::Relaxed),
            infrastructure_failures: self.infrastructure_failures.load(Ordering::Relaxed),
            audit_failures: self.audit_failures.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub views_counted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub csrf_failures: u64,
    pub rate_limited: u64,
    pub referer_failures: u64,
    pub bots_blocked: u64,
    pub crawlers_skipped: u64,
    pub infrastructure_failures: u64,
    pub audit_failures: u64,
    pub throttled: u64,
}
