pub mod downloads;
pub mod models;

pub async fn health() -> &'static str {
    "ok"
}
