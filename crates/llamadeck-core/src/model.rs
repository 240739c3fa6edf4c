use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An installed model as reported by the daemon's `/api/tags` catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Model name, unique within the catalog (e.g. "llama3.2:latest").
    pub name: String,
    /// On-disk size in bytes.
    pub size: u64,
    pub digest: String,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDetails {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub parameter_size: Option<String>,
    #[serde(default)]
    pub quantization_level: Option<String>,
}

/// A currently loaded model instance from `/api/ps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningModelRecord {
    /// Joins against `ModelRecord::name`.
    pub model: String,
    /// Total memory footprint in bytes.
    pub size: u64,
    /// VRAM portion of the footprint in bytes.
    pub size_vram: u64,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub context_length: Option<u64>,
}

/// One installed model joined by name against the running set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedModel {
    pub name: String,
    pub size_bytes: u64,
    pub digest: String,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub details: Option<ModelDetails>,
    /// True iff a matching running record existed at aggregation time.
    pub loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vram_gb: Option<f64>,
    /// Seconds until the daemon unloads the model, when an expiry is set
    /// and still in the future.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<i64>,
}

/// The published model view. Replaced wholesale on every aggregation cycle,
/// never mutated in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsSnapshot {
    pub models: Vec<UnifiedModel>,
    #[serde(default)]
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Format bytes into a human-readable size.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let base: f64 = 1024.0;
    let exponent = (bytes as f64).log(base).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);

    let size = bytes as f64 / base.powi(exponent as i32);

    format!("{:.2} {}", size, UNITS[exponent])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_size_covers_unit_boundaries() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(500), "500.00 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1048576), "1.00 MB");
        assert_eq!(format_size(1073741824), "1.00 GB");
        assert_eq!(format_size(4683087332), "4.36 GB");
    }

    #[test]
    fn tags_payload_parses() {
        let json = r#"{
            "name": "llama3.2:latest",
            "size": 2019393189,
            "digest": "a80c4f17acd5",
            "modified_at": "2025-11-04T14:56:49.277302595-08:00",
            "details": { "format": "gguf", "family": "llama", "parameter_size": "3.2B", "quantization_level": "Q4_K_M" }
        }"#;
        let record: ModelRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.name, "llama3.2:latest");
        assert_eq!(record.details.unwrap().parameter_size.as_deref(), Some("3.2B"));
    }

    #[test]
    fn ps_payload_parses_without_expiry() {
        let json = r#"{ "model": "llama3.2:latest", "size": 3850000000, "size_vram": 3850000000 }"#;
        let record: RunningModelRecord = serde_json::from_str(json).unwrap();
        assert!(record.expires_at.is_none());
        assert!(record.context_length.is_none());
    }
}
