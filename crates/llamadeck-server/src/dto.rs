use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct PullResponse {
    pub id: Uuid,
    /// True when another pull for the same name was already in flight. The
    /// new task starts regardless; this only feeds the duplicate-pull
    /// warning in the UI.
    pub already_pulling: bool,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
}

#[derive(Debug, Deserialize)]
pub struct ModelNameRequest {
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateModelRequest {
    pub model: String,
    pub modelfile: String,
}
