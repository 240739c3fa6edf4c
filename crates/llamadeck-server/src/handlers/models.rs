use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use llamadeck_client::ShowResponse;
use llamadeck_core::ModelsSnapshot;

use crate::dto::{CreateModelRequest, ModelNameRequest};
use crate::error::AppError;
use crate::state::AppState;

/// The latest published snapshot. The poll loop keeps it fresh; this never
/// blocks on the daemon.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<ModelsSnapshot> {
    Json(state.models.current())
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ModelsSnapshot>, AppError> {
    Ok(Json(state.models.refresh().await?))
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModelNameRequest>,
) -> Result<Json<ShowResponse>, AppError> {
    Ok(Json(state.client.show(&req.model).await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateModelRequest>,
) -> Result<StatusCode, AppError> {
    state.client.create(&req.model, &req.modelfile).await?;
    state.models.refresh_handle().request();
    Ok(StatusCode::CREATED)
}

/// Model names carry slashes and colons, so deletion takes the name in the
/// body like the daemon itself does.
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ModelNameRequest>,
) -> Result<StatusCode, AppError> {
    state.client.delete(&req.model).await?;
    state.models.refresh_handle().request();
    Ok(StatusCode::NO_CONTENT)
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    Ok(Json(state.client.chat(body).await?))
}
