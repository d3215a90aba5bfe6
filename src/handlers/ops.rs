//! Operator endpoints: health, counters and the latest attempt records.
//! Used by: server.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::audit::ViewCountAttempt;
use crate::error::Result;
use crate::state::AppState;
use crate::telemetry::MetricsSnapshot;

const RECENT_ATTEMPTS: usize = 100;

/// Liveness plus a read from the attempt store.
pub async fn health(State(state): State<AppState>) -> StatusCode {
    match state.attempts.recent(1) {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "attempt store unreachable");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

pub async fn recent_attempts(State(state): State<AppState>) -> Result<Json<Vec<ViewCountAttempt>>> {
    Ok(Json(state.attempts.recent(RECENT_ATTEMPTS)?))
}
