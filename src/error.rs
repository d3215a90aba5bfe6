//! Unified error types for viewguard.
//! Used by: cache, content, audit, ratelimit, dedup, handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cache error: {0}")]
    Cache(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not found"),
            Error::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "service unavailable"),
            Error::Cache(_)
            | Error::Config(_)
            | Error::Database(_)
            | Error::Serialization(_)
            | Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server error"),
        };
        tracing::error!(error = %self, "request failed");
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Maps a lock deadline miss on `what` into an infrastructure error.
pub fn deadline_err(what: &'static str) -> Error {
    Error::ServiceUnavailable(format!("{what} lock deadline elapsed"))
}
