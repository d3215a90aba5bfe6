//! View-count request validation pipeline.
//!
//! `RECEIVED -> CSRF -> TRANSPORT -> PAYLOAD -> RATE -> CONTENT -> REFERER -> DEDUP -> COUNTED`,
//! stopping at the first rejection. Every request that enters
//! [`ViewCountPipeline::process`] leaves exactly one attempt record,
//! whatever the outcome.

pub mod checks;

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method, StatusCode};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::audit::AttemptRecorder;
use crate::bot::{BotClassifier, Verdict};
use crate::content::ContentRepository;
use crate::dedup::ViewTracker;
use crate::error::Error;
use crate::ratelimit::{Decision, LimiterConfig, SlidingWindowLimiter};
use crate::session::Session;
use crate::telemetry::Metrics;

pub const CSRF_HEADER: &str = "x-csrftoken";
pub const CSRF_ALT_HEADER: &str = "x-csrf-token";
pub const CSRF_BODY_FIELD: &str = "csrfmiddlewaretoken";
pub const REQUESTED_WITH_HEADER: &str = "x-requested-with";

pub const REASON_COUNTED: &str = "view counted";
pub const REASON_ALREADY_VIEWED: &str = "page already viewed";

/// The parts of an increment request the pipeline looks at.
#[derive(Debug, Clone)]
pub struct ViewRequest {
    pub content_id: String,
    pub method: Method,
    pub ip: String,
    pub user_agent: String,
    pub referer: Option<String>,
    pub requested_with: Option<String>,
    pub csrf_header: Option<String>,
    pub csrf_alt_header: Option<String>,
    pub body: Bytes,
}

impl ViewRequest {
    pub fn from_parts(content_id: String, method: Method, headers: &HeaderMap, ip: String, body: Bytes) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        Self {
            content_id,
            method,
            ip,
            user_agent: header(header::USER_AGENT.as_str()).unwrap_or_default(),
            referer: header(header::REFERER.as_str()),
            requested_with: header(REQUESTED_WITH_HEADER),
            csrf_header: header(CSRF_HEADER),
            csrf_alt_header: header(CSRF_ALT_HEADER),
            body,
        }
    }

    /// Token from a JSON or form-encoded body field.
    pub fn body_token(&self) -> Option<String> {
        #[derive(Deserialize)]
        struct TokenBody {
            csrfmiddlewaretoken: Option<String>,
        }

        if self.body.is_empty() {
            return None;
        }
        if let Ok(parsed) = serde_json::from_slice::<TokenBody>(&self.body) {
            return parsed.csrfmiddlewaretoken;
        }
        url::form_urlencoded::parse(&self.body)
            .find(|(k, _)| k == CSRF_BODY_FIELD)
            .map(|(_, v)| v.into_owned())
    }

    /// Every non-empty token the client presented, body first.
    pub fn csrf_candidates(&self) -> Vec<String> {
        [self.body_token(), self.csrf_header.clone(), self.csrf_alt_header.clone()]
            .into_iter()
            .flatten()
            .filter(|t| !t.is_empty())
            .collect()
    }
}

pub struct CheckContext<'a> {
    pub session_token: Option<&'a str>,
    pub max_payload_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    Csrf,
    Transport,
    Payload,
    RateLimited,
    NotFound,
    Referer,
    Bot,
    Infrastructure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectKind,
    /// Recorded in the attempt log.
    pub reason: &'static str,
    pub reset_time: Option<DateTime<Utc>>,
}

impl Rejection {
    fn new(kind: RejectKind, reason: &'static str) -> Self {
        Self { kind, reason, reset_time: None }
    }

    pub fn csrf() -> Self {
        Self::new(RejectKind::Csrf, "invalid CSRF token")
    }

    pub fn transport() -> Self {
        Self::new(RejectKind::Transport, "invalid request type")
    }

    pub fn payload() -> Self {
        Self::new(RejectKind::Payload, "invalid payload")
    }

    pub fn rate_limited(reset_time: DateTime<Utc>) -> Self {
        Self {
            reset_time: Some(reset_time),
            ..Self::new(RejectKind::RateLimited, "rate limit exceeded")
        }
    }

    pub fn not_found() -> Self {
        Self::new(RejectKind::NotFound, "content not found")
    }

    pub fn referer() -> Self {
        Self::new(RejectKind::Referer, "invalid referer")
    }

    pub fn bot() -> Self {
        Self::new(RejectKind::Bot, "bot")
    }

    fn cache(err: Error) -> Self {
        tracing::error!(error = %err, "view count cache failure");
        Self::new(RejectKind::Infrastructure, "cache unavailable")
    }

    fn storage(err: Error) -> Self {
        if let Error::NotFound(_) = err {
            return Self::not_found();
        }
        tracing::error!(error = %err, "view count storage failure");
        Self::new(RejectKind::Infrastructure, "storage unavailable")
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            RejectKind::Csrf | RejectKind::Referer | RejectKind::Bot => StatusCode::FORBIDDEN,
            RejectKind::Transport => StatusCode::METHOD_NOT_ALLOWED,
            RejectKind::Payload => StatusCode::BAD_REQUEST,
            RejectKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            RejectKind::NotFound => StatusCode::NOT_FOUND,
            RejectKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// What the client is told; infrastructure detail stays in the log.
    pub fn public_message(&self) -> &'static str {
        match self.kind {
            RejectKind::Infrastructure => "server error",
            _ => self.reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Counted { view_count: u64 },
    AlreadyViewed { view_count: u64 },
    /// Allow-listed crawler: not counted, not recorded.
    Skipped,
    Rejected(Rejection),
}

impl Outcome {
    fn audit_entry(&self) -> (bool, &'static str) {
        match self {
            Outcome::Counted { .. } => (true, REASON_COUNTED),
            Outcome::AlreadyViewed { .. } => (false, REASON_ALREADY_VIEWED),
            Outcome::Skipped => (false, "crawler"),
            Outcome::Rejected(r) => (false, r.reason),
        }
    }
}

pub struct PipelineConfig {
    pub view_limit: LimiterConfig,
    pub max_payload_bytes: usize,
}

pub struct ViewCountPipeline {
    classifier: BotClassifier,
    limiter: Arc<SlidingWindowLimiter>,
    tracker: ViewTracker,
    content: Arc<dyn ContentRepository>,
    recorder: AttemptRecorder,
    metrics: Arc<Metrics>,
    config: PipelineConfig,
}

impl ViewCountPipeline {
    pub fn new(
        classifier: BotClassifier,
        limiter: Arc<SlidingWindowLimiter>,
        tracker: ViewTracker,
        content: Arc<dyn ContentRepository>,
        recorder: AttemptRecorder,
        metrics: Arc<Metrics>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            classifier,
            limiter,
            tracker,
            content,
            recorder,
            metrics,
            config,
        }
    }

    /// Bot gate followed by the validation pipeline.
    ///
    /// Crawlers are skipped without a record; other bots are recorded and
    /// rejected without touching the rate limiter.
    pub fn handle(&self, req: &ViewRequest, session: Option<&Session>) -> Outcome {
        match self.classifier.classify(&req.user_agent) {
            Verdict::Crawler => {
                self.metrics.record_crawler();
                tracing::debug!(content_id = %req.content_id, user_agent = %req.user_agent, "crawler view skipped");
                Outcome::Skipped
            }
            Verdict::Bot => {
                let rejection = Rejection::bot();
                if self
                    .recorder
                    .record(&req.content_id, &req.ip, &req.user_agent, false, rejection.reason)
                    .is_none()
                {
                    self.metrics.record_audit_failure();
                }
                self.metrics.record_bot();
                tracing::info!(content_id = %req.content_id, ip = %req.ip, user_agent = %req.user_agent, "bot view rejected");
                Outcome::Rejected(rejection)
            }
            Verdict::Human => self.process(req, session),
        }
    }

    pub fn process(&self, req: &ViewRequest, session: Option<&Session>) -> Outcome {
        let pending = self.recorder.begin(&req.content_id, &req.ip, &req.user_agent);
        let outcome = self.run(req, session).unwrap_or_else(Outcome::Rejected);
        let (success, reason) = outcome.audit_entry();
        if pending.finish(success, reason).is_none() {
            self.metrics.record_audit_failure();
        }
        self.observe(req, &outcome);
        outcome
    }

    fn run(&self, req: &ViewRequest, session: Option<&Session>) -> Result<Outcome, Rejection> {
        let ctx = CheckContext {
            session_token: session.map(Session::csrf_token),
            max_payload_bytes: self.config.max_payload_bytes,
        };
        for check in checks::REQUEST_CHECKS {
            check(req, &ctx)?;
        }
        let session = session.ok_or_else(Rejection::csrf)?;

        let rate_key = format!("{}:{}", req.content_id, req.ip);
        let decision = self
            .limiter
            .allow(&rate_key, &self.config.view_limit)
            .map_err(Rejection::cache)?;
        if let Decision::Limited { reset_time, .. } = decision {
            return Err(Rejection::rate_limited(reset_time));
        }

        let item = self
            .content
            .find(&req.content_id)
            .map_err(Rejection::storage)?
            .ok_or_else(Rejection::not_found)?;

        checks::check_referer(req, &item.path)?;

        let seen = self
            .tracker
            .already_viewed(session, &req.ip, &req.user_agent, &item.id)
            .map_err(Rejection::cache)?;
        if seen {
            return Ok(Outcome::AlreadyViewed { view_count: item.view_count });
        }

        let view_count = self.content.increment_views(&item.id).map_err(Rejection::storage)?;
        if let Err(e) = self.tracker.mark_viewed(session, &req.ip, &req.user_agent, &item.id) {
            tracing::warn!(content_id = %item.id, error = %e, "view counted but fingerprint not stored");
        }
        Ok(Outcome::Counted { view_count })
    }

    fn observe(&self, req: &ViewRequest, outcome: &Outcome) {
        match outcome {
            Outcome::Counted { view_count } => {
                self.metrics.record_counted();
                tracing::info!(content_id = %req.content_id, view_count, "view counted");
            }
            Outcome::AlreadyViewed { .. } => {
                self.metrics.record_duplicate();
                tracing::debug!(content_id = %req.content_id, ip = %req.ip, "page already viewed");
            }
            Outcome::Skipped => {}
            Outcome::Rejected(r) => {
                self.metrics.record_rejection(r.kind);
                if r.kind == RejectKind::Csrf {
                    tracing::warn!(
                        severity = "security",
                        content_id = %req.content_id,
                        ip = %req.ip,
                        reason = r.reason,
                        "view count rejected"
                    );
                } else {
                    tracing::info!(content_id = %req.content_id, ip = %req.ip, reason = r.reason, "view count rejected");
                }
            }
        }
    }
}
