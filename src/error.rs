use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors that cross the HTTP boundary. Everything recoverable inside the
/// engine (unreachable hosts, failed commands, parse misses) is folded into
/// result records before it gets here; this type only covers request-level
/// failures.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("a router with this {0} already exists")]
    Conflict(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, field) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            ApiError::Conflict(field) => (StatusCode::BAD_REQUEST, Some(*field)),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::Database(e) => {
                tracing::error!("repository failure: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = match field {
            Some(field) => json!({ "error": self.to_string(), "field": field }),
            None => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
