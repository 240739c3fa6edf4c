use std::sync::Arc;

use llamadeck_client::{ModelTransport, OllamaClient};
use llamadeck_core::{LlamaDeckConfig, Result};
use llamadeck_services::{DownloadManager, ModelStateAggregator};

pub struct AppState {
    pub client: OllamaClient,
    pub models: Arc<ModelStateAggregator>,
    pub downloads: DownloadManager,
}

impl AppState {
    pub fn new(config: &LlamaDeckConfig) -> Result<Self> {
        let client = OllamaClient::new(&config.daemon)?;
        let transport: Arc<dyn ModelTransport> = Arc::new(client.clone());

        let models = Arc::new(ModelStateAggregator::new(transport.clone(), &config.poll));
        let downloads =
            DownloadManager::new(transport, models.refresh_handle(), &config.download);

        Ok(Self {
            client,
            models,
            downloads,
        })
    }
}
