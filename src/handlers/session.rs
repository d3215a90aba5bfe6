//! Session start / anti-forgery token issuance.
//! Used by: server.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::middleware::client_ip;
use crate::ratelimit::Decision;
use crate::session::session_id_from_headers;
use crate::state::AppState;

#[derive(Serialize)]
pub struct SessionResponse {
    pub csrf_token: String,
}

pub async fn issue(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response> {
    let cookie_name = &state.config.session_cookie;
    let existing = session_id_from_headers(&headers, cookie_name);

    if existing.as_deref().and_then(|id| state.sessions.get(id)).is_none() {
        let ip = client_ip(&headers, connect.map(|c| c.0), state.config.trust_proxy_headers);
        if let Decision::Limited { .. } = state.limiter.allow(&ip, &state.config.auth_limit)? {
            tracing::info!(ip = %ip, "session issuance rate limit exceeded");
            return Ok((
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "success": false, "error": "rate limit exceeded" })),
            )
                .into_response());
        }
    }

    let (session, created) = state.sessions.get_or_create(existing.as_deref());
    if created {
        tracing::debug!(session = %session.id(), "session started");
    }
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        cookie_name,
        session.id()
    );
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(SessionResponse {
            csrf_token: session.csrf_token().to_owned(),
        }),
    )
        .into_response())
}
