//! Axum router and server setup.
//! Used by: main.

use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::routing::{any, get};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::abuse;
use crate::handlers;
use crate::middleware::global_throttle;
use crate::state::AppState;

const VIEW_BODY_LIMIT: usize = 16 * 1024;

pub fn build_router(state: AppState) -> Router {
    // every method reaches the pipeline so that wrong-method attempts are audited too
    let views = Router::new()
        .route("/api/content/:id/view", any(handlers::views::increment))
        .layer(DefaultBodyLimit::max(VIEW_BODY_LIMIT));

    Router::new()
        .route("/health", get(handlers::ops::health))
        .route("/metrics", get(handlers::ops::metrics))
        .route("/api/attempts", get(handlers::ops::recent_attempts))
        .route("/api/session", get(handlers::session::issue))
        .merge(views)
        .layer(axum::middleware::from_fn_with_state(state.clone(), global_throttle))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(state: AppState, addr: &str) -> std::io::Result<()> {
    let scan = state.config.scan.clone();
    tokio::spawn(abuse::run_periodic(state.scanner(), scan));

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await
}
