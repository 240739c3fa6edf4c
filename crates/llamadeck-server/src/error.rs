use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use llamadeck_core::LlamaDeckError;
use serde::Serialize;

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Upstream(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<LlamaDeckError> for AppError {
    fn from(e: LlamaDeckError) -> Self {
        match e {
            LlamaDeckError::ModelNotFound(_) => AppError::NotFound(e.to_string()),
            LlamaDeckError::Daemon { status: 404, message } => AppError::NotFound(message),
            LlamaDeckError::Daemon { status: 400, message } => AppError::BadRequest(message),
            LlamaDeckError::Daemon { .. }
            | LlamaDeckError::ConnectionRefused
            | LlamaDeckError::Timeout(_)
            | LlamaDeckError::Http(_) => AppError::Upstream(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}
