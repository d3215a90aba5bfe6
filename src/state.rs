//! Shared application state.

use std::sync::Arc;

use crate::abuse::AbuseScanner;
use crate::audit::sqlite::SqliteAttemptLog;
use crate::audit::{AttemptRecorder, AttemptStore};
use crate::bot::BotClassifier;
use crate::cache::memory::MemoryCache;
use crate::cache::Cache;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::content::{ContentRepository, SqliteContent};
use crate::dedup::ViewTracker;
use crate::error::Result;
use crate::ratelimit::SlidingWindowLimiter;
use crate::session::SessionStore;
use crate::telemetry::Metrics;
use crate::validator::{PipelineConfig, ViewCountPipeline};

pub struct AppStateInner {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub sessions: SessionStore,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub pipeline: ViewCountPipeline,
    pub attempts: Arc<dyn AttemptStore>,
    pub metrics: Arc<Metrics>,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn scanner(&self) -> AbuseScanner {
        AbuseScanner::new(self.attempts.clone(), self.clock.clone())
    }
}

struct StateBuilder {
    config: Config,
    clock: Arc<dyn Clock>,
    content: Arc<dyn ContentRepository>,
    attempts: Arc<dyn AttemptStore>,
}

impl StateBuilder {
    fn build(self) -> AppState {
        let StateBuilder { config, clock, content, attempts } = self;
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::with_limits(
            clock.clone(),
            100_000,
            config.backend_deadline(),
        ));
        let limiter = Arc::new(SlidingWindowLimiter::new(cache.clone(), clock.clone()));
        let metrics = Arc::new(Metrics::new());

        let pipeline = ViewCountPipeline::new(
            BotClassifier::new(&config.bot),
            limiter.clone(),
            ViewTracker::new(cache, config.dedup_ttl_seconds),
            content,
            AttemptRecorder::new(attempts.clone(), clock.clone()),
            metrics.clone(),
            PipelineConfig {
                view_limit: config.view_limit.clone(),
                max_payload_bytes: config.max_payload_bytes,
            },
        );

        Arc::new(AppStateInner {
            sessions: SessionStore::new(clock.clone()),
            config,
            clock,
            limiter,
            pipeline,
            attempts,
            metrics,
        })
    }
}

pub fn open_content(config: &Config) -> Result<SqliteContent> {
    SqliteContent::open(&config.db_path, config.backend_deadline())
}

pub fn open_attempts(config: &Config) -> Result<SqliteAttemptLog> {
    SqliteAttemptLog::open(&config.db_path, config.backend_deadline())
}

pub fn build_state(config: Config) -> Result<AppState> {
    Ok(StateBuilder {
        content: Arc::new(open_content(&config)?),
        attempts: Arc::new(open_attempts(&config)?),
        clock: Arc::new(SystemClock),
        config,
    }
    .build())
}

/// In-memory audit log and caller-supplied clock and content.
pub fn build_test_state(
    config: Config,
    clock: Arc<dyn Clock>,
    content: Arc<dyn ContentRepository>,
) -> Result<AppState> {
    Ok(StateBuilder {
        config,
        clock,
        content,
        attempts: Arc::new(SqliteAttemptLog::open_in_memory()?),
    }
    .build())
}
