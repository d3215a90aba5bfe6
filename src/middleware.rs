//! Client address resolution and the global per-IP throttle.
//! Used by: server, handlers.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::ratelimit::Decision;
use crate::state::AppState;

/// Resolves the client address, consulting proxy headers only when trusted.
pub fn client_ip(headers: &HeaderMap, connect: Option<SocketAddr>, trust_proxy: bool) -> String {
    let from_proxy = || {
        headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .or_else(|| {
                headers
                    .get("x-forwarded-for")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()))
            })
            .map(str::to_owned)
    };
    trust_proxy
        .then(from_proxy)
        .flatten()
        .or_else(|| connect.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".into())
}

/// Per-IP throttle over every route. It runs before the user agent is
/// classified, so allow-listed crawlers count toward it like anyone else.
pub async fn global_throttle(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(
        req.headers(),
        connect.map(|c| c.0),
        state.config.trust_proxy_headers,
    );
    match state.limiter.allow(&ip, &state.config.global_limit) {
        Ok(Decision::Admitted { .. }) => next.run(req).await,
        Ok(Decision::Limited { reset_time, .. }) => {
            state.metrics.record_throttled();
            tracing::info!(ip = %ip, reset_time = %reset_time, "global rate limit exceeded");
            let retry_after = (reset_time - state.clock.now()).num_seconds().max(1);
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after.to_string())],
                Json(json!({ "success": false, "error": "rate limit exceeded" })),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}
