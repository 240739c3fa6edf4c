use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use llamadeck_core::{
    DaemonConfig, LlamaDeckError, ModelDetails, ModelRecord, Result, RunningModelRecord,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::transport::{ModelTransport, PullStream};

#[derive(Debug, Clone)]
pub struct OllamaClient {
    host: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelRecord>,
}

#[derive(Debug, Deserialize)]
struct PsResponse {
    models: Vec<RunningModelRecord>,
}

#[derive(Debug, Serialize)]
struct PullBody<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ModelBody<'a> {
    model: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateBody<'a> {
    model: &'a str,
    modelfile: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct DaemonErrorBody {
    error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowResponse {
    #[serde(default)]
    pub modelfile: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub details: Option<ModelDetails>,
}

impl OllamaClient {
    pub fn new(config: &DaemonConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| LlamaDeckError::Http(e.to_string()))?;

        Ok(Self {
            host: config.host.trim_end_matches('/').to_string(),
            client,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub async fn list_models(&self) -> Result<Vec<ModelRecord>> {
        let url = format!("{}/api/tags", self.host);
        let resp = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let resp = check_status(resp).await?;

        let tags: TagsResponse = resp.json().await.map_err(map_reqwest_error)?;
        debug!("Fetched {} installed models", tags.models.len());
        Ok(tags.models)
    }

    pub async fn list_loaded(&self) -> Result<Vec<RunningModelRecord>> {
        let url = format!("{}/api/ps", self.host);
        let resp = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let resp = check_status(resp).await?;

        let ps: PsResponse = resp.json().await.map_err(map_reqwest_error)?;
        debug!("Fetched {} running models", ps.models.len());
        Ok(ps.models)
    }

    /// Open a streamed pull. No overall timeout here: pulls run for as long
    /// as the transfer takes, and stalls are the caller's concern.
    pub async fn pull(&self, model: &str) -> Result<PullStream> {
        let url = format!("{}/api/pull", self.host);
        info!("Requesting pull of model: {}", model);

        let resp = self
            .client
            .post(&url)
            .json(&PullBody { model, stream: true })
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let resp = check_status(resp).await?;

        Ok(Box::pin(resp.bytes_stream().map_err(map_reqwest_error)))
    }

    pub async fn delete(&self, model: &str) -> Result<()> {
        let url = format!("{}/api/delete", self.host);
        info!("Deleting model: {}", model);

        let resp = self
            .client
            .delete(&url)
            .timeout(self.request_timeout)
            .json(&ModelBody { model })
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match check_status(resp).await {
            Ok(_) => Ok(()),
            Err(LlamaDeckError::Daemon { status: 404, .. }) => {
                Err(LlamaDeckError::ModelNotFound(model.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn show(&self, model: &str) -> Result<ShowResponse> {
        let url = format!("{}/api/show", self.host);
        let resp = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&ModelBody { model })
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let resp = check_status(resp).await?;

        resp.json().await.map_err(map_reqwest_error)
    }

    /// Create a model from a Modelfile. The Modelfile text is forwarded
    /// verbatim; parsing it is the daemon's job.
    pub async fn create(&self, model: &str, modelfile: &str) -> Result<()> {
        let url = format!("{}/api/create", self.host);
        info!("Creating model: {}", model);

        let resp = self
            .client
            .post(&url)
            .json(&CreateBody { model, modelfile, stream: false })
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(resp).await?;
        Ok(())
    }

    /// Request/response chat passthrough. The body is forwarded unchanged
    /// except that streaming is forced off.
    pub async fn chat(&self, mut body: serde_json::Value) -> Result<serde_json::Value> {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("stream".to_string(), serde_json::Value::Bool(false));
        }

        let url = format!("{}/api/chat", self.host);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let resp = check_status(resp).await?;

        resp.json().await.map_err(map_reqwest_error)
    }
}

#[async_trait]
impl ModelTransport for OllamaClient {
    async fn list_installed(&self) -> Result<Vec<ModelRecord>> {
        self.list_models().await
    }

    async fn list_running(&self) -> Result<Vec<RunningModelRecord>> {
        self.list_loaded().await
    }

    async fn start_pull(&self, model: &str) -> Result<PullStream> {
        self.pull(model).await
    }
}

/// Map reqwest failures onto the transport taxonomy, detecting refused
/// connections the way a user needs to see them.
fn map_reqwest_error(e: reqwest::Error) -> LlamaDeckError {
    if e.is_connect() {
        return LlamaDeckError::ConnectionRefused;
    }
    if e.is_timeout() {
        return LlamaDeckError::Timeout(e.to_string());
    }
    LlamaDeckError::Http(e.to_string())
}

/// Turn a non-2xx response into a daemon error carrying the daemon's own
/// message when the body has one.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }

    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<DaemonErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);

    Err(LlamaDeckError::Daemon { status, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_normalized() {
        let config = DaemonConfig {
            host: "http://localhost:11434/".to_string(),
            ..DaemonConfig::default()
        };
        let client = OllamaClient::new(&config).unwrap();
        assert_eq!(client.host(), "http://localhost:11434");
    }

    #[test]
    fn tags_response_parses() {
        let json = r#"{"models":[{"name":"qwen2.5:7b","size":4683087332,"digest":"845dbda0ea48","modified_at":"2025-10-01T10:00:00Z"}]}"#;
        let tags: TagsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(tags.models.len(), 1);
        assert_eq!(tags.models[0].name, "qwen2.5:7b");
    }

    #[test]
    fn ps_response_parses_with_expiry() {
        let json = r#"{"models":[{"model":"llama3.2:latest","size":5000000000,"size_vram":4294967296,"expires_at":"2026-08-06T14:38:31.83753-07:00","context_length":4096}]}"#;
        let ps: PsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(ps.models[0].size_vram, 4294967296);
        assert!(ps.models[0].expires_at.is_some());
    }
}
