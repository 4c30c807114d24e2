//! Captured and persisted artifacts.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Raw captured output handed from the worker to the post-processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArtifact {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl RawArtifact {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
        }
    }

    /// File extension matching the artifact's own format.
    pub fn native_extension(&self) -> &'static str {
        extension_for_mime(&self.mime)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Map a mime type (codec parameters allowed) to a file extension.
pub fn extension_for_mime(mime: &str) -> &'static str {
    let base = mime.split(';').next().unwrap_or("").trim().to_lowercase();
    match base.as_str() {
        "video/mp4" => "mp4",
        "video/x-matroska" | "video/matroska" => "mkv",
        "video/quicktime" => "mov",
        _ => "webm",
    }
}

/// A persisted output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInfo {
    pub name: String,
    /// Size in bytes
    pub size: u64,
    pub created_at: DateTime<Utc>,
    /// Location the artifact can be fetched from
    pub url: String,
}
