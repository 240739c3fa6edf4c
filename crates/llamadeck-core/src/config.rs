use std::env;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlamaDeckConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

impl LlamaDeckConfig {
    /// Defaults plus the `OLLAMA_HOST` environment override.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = env::var("OLLAMA_HOST") {
            if !host.trim().is_empty() {
                config.daemon.host = host;
            }
        }
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Base URL of the model runtime daemon.
    pub host: String,
    pub connect_timeout_secs: u64,
    /// Timeout for short request/response calls (tags, ps, show, delete).
    /// Pull streams are exempt and governed by `DownloadConfig` instead.
    pub request_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Cadence of the periodic installed+running refresh.
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_secs: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// A pull stream that stays silent this long is failed rather than
    /// left hanging until process restart.
    pub idle_timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self { idle_timeout_secs: 300 }
    }
}
