use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlamaDeckError {
    #[error("Daemon unreachable - is Ollama running?")]
    ConnectionRefused,

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Daemon error ({status}): {message}")]
    Daemon { status: u16, message: String },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LlamaDeckError>;
