use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use llamadeck_core::DownloadSnapshot;
use uuid::Uuid;

use crate::dto::{CancelResponse, ClearResponse, PullRequest, PullResponse};
use crate::error::AppError;
use crate::state::AppState;

pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<DownloadSnapshot>> {
    Json(state.downloads.list())
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PullRequest>,
) -> Result<Json<PullResponse>, AppError> {
    let model = req.model.trim();
    if model.is_empty() {
        return Err(AppError::BadRequest("model name is required".to_string()));
    }

    let already_pulling = state.downloads.is_active(model);
    let id = state.downloads.start(model);
    Ok(Json(PullResponse { id, already_pulling }))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.downloads.cancel(id),
    })
}

pub async fn remove(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> StatusCode {
    state.downloads.remove(id);
    StatusCode::NO_CONTENT
}

pub async fn clear(State(state): State<Arc<AppState>>) -> Json<ClearResponse> {
    Json(ClearResponse {
        removed: state.downloads.clear_terminal(),
    })
}
