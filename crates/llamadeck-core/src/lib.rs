// Domain modules
pub mod config;
pub mod download;
pub mod error;
pub mod model;

pub use config::{DaemonConfig, DownloadConfig, LlamaDeckConfig, PollConfig};
pub use download::{DownloadSnapshot, DownloadStatus, ProgressEvent};
pub use error::{LlamaDeckError, Result};
pub use model::{
    format_size, ModelDetails, ModelRecord, ModelsSnapshot, RunningModelRecord, UnifiedModel,
};
