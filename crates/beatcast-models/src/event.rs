//! Progress events streamed to the requester of a job.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::phase::{ErrorKind, Phase, MAX_PENDING_PROGRESS};

/// One observable state change of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProgressEvent {
    pub status: Phase,
    /// Progress percentage (0.0-100.0)
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProgressEvent {
    /// Create a non-terminal phase event. Progress is capped below 100.
    pub fn phase(status: Phase, progress: f64) -> Self {
        Self {
            status,
            progress: progress.clamp(0.0, MAX_PENDING_PROGRESS),
            url: None,
            filename: None,
            error: None,
            detail: None,
        }
    }

    /// Create the terminal success event.
    pub fn done(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            status: Phase::Done,
            progress: 100.0,
            url: Some(url.into()),
            filename: Some(filename.into()),
            error: None,
            detail: None,
        }
    }

    /// Create the terminal error event.
    pub fn error(kind: ErrorKind, detail: Option<String>, progress: f64) -> Self {
        Self {
            status: Phase::Error,
            progress: progress.clamp(0.0, MAX_PENDING_PROGRESS),
            url: None,
            filename: None,
            error: Some(kind),
            detail,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_done_reports_full_progress() {
        let event = ProgressEvent::done("/exports/a.mp4", "a.mp4");
        assert_eq!(event.progress, 100.0);
        assert!(event.is_terminal());
    }

    #[test]
    fn test_phase_progress_capped() {
        let event = ProgressEvent::phase(Phase::Recording, 100.0);
        assert!(event.progress < 100.0);
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(ProgressEvent::phase(Phase::Buffering, 0.0)).unwrap();
        assert_eq!(json["status"], "buffering");
        assert!(json.get("url").is_none());
        assert!(json.get("error").is_none());

        let json = serde_json::to_value(ProgressEvent::error(
            ErrorKind::ExportFailed,
            Some("capture failed".into()),
            42.0,
        ))
        .unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "export_failed");
        assert_eq!(json["detail"], "capture failed");
    }
}
