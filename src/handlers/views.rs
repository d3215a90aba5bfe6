//! View-count increment endpoint.
//! Used by: server.

use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::middleware::client_ip;
use crate::session::session_id_from_headers;
use crate::state::AppState;
use crate::validator::{Outcome, RejectKind, ViewRequest};

#[derive(Debug, Serialize)]
pub struct ViewResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<String>,
}

impl ViewResponse {
    fn message(success: bool, message: &'static str, view_count: Option<u64>) -> Self {
        Self {
            success,
            view_count,
            message: Some(message),
            error: None,
            reset_time: None,
        }
    }

    fn error(error: &'static str) -> Self {
        Self {
            success: false,
            view_count: None,
            message: None,
            error: Some(error),
            reset_time: None,
        }
    }
}

pub async fn increment(
    State(state): State<AppState>,
    Path(content_id): Path<String>,
    method: Method,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ip = client_ip(&headers, connect.map(|c| c.0), state.config.trust_proxy_headers);
    let session = session_id_from_headers(&headers, &state.config.session_cookie)
        .and_then(|id| state.sessions.get(&id));
    let req = ViewRequest::from_parts(content_id, method, &headers, ip, body);

    let worker = state.clone();
    let outcome = tokio::task::spawn_blocking(move || worker.pipeline.handle(&req, session.as_deref())).await;

    match outcome {
        Ok(outcome) => respond(&state, outcome),
        Err(e) => {
            tracing::error!(error = %e, "view count pipeline aborted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ViewResponse::error("server error")),
            )
                .into_response()
        }
    }
}

fn respond(state: &AppState, outcome: Outcome) -> Response {
    match outcome {
        Outcome::Counted { view_count } => (
            StatusCode::OK,
            Json(ViewResponse::message(true, "View counted", Some(view_count))),
        )
            .into_response(),
        Outcome::AlreadyViewed { view_count } => (
            StatusCode::OK,
            Json(ViewResponse::message(false, "Page already viewed", Some(view_count))),
        )
            .into_response(),
        Outcome::Skipped => (
            StatusCode::OK,
            Json(ViewResponse::message(false, "View not counted", None)),
        )
            .into_response(),
        Outcome::Rejected(rejection) => {
            let mut body = ViewResponse::error(rejection.public_message());
            body.reset_time = rejection.reset_time.map(|t| t.to_rfc3339());
            let status = rejection.status();
            match (rejection.kind, rejection.reset_time) {
                (RejectKind::RateLimited, Some(reset)) => {
                    let retry_after = (reset - state.clock.now()).num_seconds().max(1);
                    (status, [(header::RETRY_AFTER, retry_after.to_string())], Json(body)).into_response()
                }
                _ => (status, Json(body)).into_response(),
            }
        }
    }
}
