use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// Point-in-time copy of one pull task, safe to read without synchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSnapshot {
    pub id: Uuid,
    pub model: String,
    pub status: DownloadStatus,
    /// Latest status line from the daemon ("downloading", "verifying sha256", ...).
    pub status_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

/// One parsed line of the daemon's streamed pull response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ProgressEvent {
    /// The daemon marks overall success with a bare `{"status":"success"}` line.
    pub fn is_terminal_success(&self) -> bool {
        self.error.is_none() && self.status == "success"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(DownloadStatus::Completed.is_terminal());
        assert!(DownloadStatus::Failed.is_terminal());
        assert!(DownloadStatus::Cancelled.is_terminal());
        assert!(DownloadStatus::Pending.is_active());
        assert!(DownloadStatus::Downloading.is_active());
    }

    #[test]
    fn success_marker_requires_clean_event() {
        let success: ProgressEvent = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert!(success.is_terminal_success());

        let progress: ProgressEvent =
            serde_json::from_str(r#"{"status":"downloading","completed":10,"total":20}"#).unwrap();
        assert!(!progress.is_terminal_success());

        let failed: ProgressEvent =
            serde_json::from_str(r#"{"status":"success","error":"pull aborted"}"#).unwrap();
        assert!(!failed.is_terminal_success());
    }
}
