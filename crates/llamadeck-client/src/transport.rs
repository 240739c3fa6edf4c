use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use llamadeck_core::{ModelRecord, Result, RunningModelRecord};

/// Raw chunks of a streamed pull response, in arrival order. Dropping the
/// stream must tear down the underlying connection so the daemon frees its
/// transfer slot.
pub type PullStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// The narrow surface the download and aggregation services depend on.
/// Implemented by [`crate::OllamaClient`] for the real daemon and by test
/// doubles elsewhere.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn list_installed(&self) -> Result<Vec<ModelRecord>>;

    async fn list_running(&self) -> Result<Vec<RunningModelRecord>>;

    /// Open a streamed pull for `model`. Fails immediately with the daemon's
    /// rejection reason when the initiating request is refused.
    async fn start_pull(&self, model: &str) -> Result<PullStream>;
}
