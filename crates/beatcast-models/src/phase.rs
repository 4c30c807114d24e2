//! Job lifecycle phases.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest progress value reported before the job is done.
pub const MAX_PENDING_PROGRESS: f64 = 99.9;

/// Lifecycle phase of a render job.
///
/// Declaration order is the forward order; `Error` may follow any
/// non-terminal phase.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Loading,
    Buffering,
    Recording,
    Encoding,
    Saving,
    Transcoding,
    Done,
    Error,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Loading => "loading",
            Phase::Buffering => "buffering",
            Phase::Recording => "recording",
            Phase::Encoding => "encoding",
            Phase::Saving => "saving",
            Phase::Transcoding => "transcoding",
            Phase::Done => "done",
            Phase::Error => "error",
        }
    }

    /// Check if this is a terminal phase (no more events expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a terminal job error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The worker could not be launched or never became ready
    Unreachable,
    /// The worker reported a failure or did not finish in time
    ExportFailed,
    /// Unexpected fault in the controller flow
    RenderFailed,
    /// Superseded by a newer submission
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unreachable => "unreachable",
            ErrorKind::ExportFailed => "export_failed",
            ErrorKind::RenderFailed => "render_failed",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enforces forward-only phase transitions and monotonic progress.
#[derive(Debug, Clone, Default)]
pub struct PhaseTracker {
    phase: Phase,
    progress: f64,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Move to `next` if it is a legal transition. Returns whether the phase changed.
    pub fn advance(&mut self, next: Phase) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        if next == Phase::Error || next > self.phase {
            self.phase = next;
            if next == Phase::Done {
                self.progress = 100.0;
            }
            return true;
        }
        false
    }

    /// Record a recording progress percentage.
    ///
    /// Returns the stored value when it moved forward. Values are truncated to
    /// one decimal and capped below 100 until the job is done.
    pub fn record_progress(&mut self, pct: f64) -> Option<f64> {
        if self.phase != Phase::Recording || !pct.is_finite() {
            return None;
        }
        let value = ((pct * 10.0).floor() / 10.0).clamp(0.0, MAX_PENDING_PROGRESS);
        if value > self.progress {
            self.progress = value;
            Some(value)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.phase(), Phase::Loading);
        assert!(tracker.advance(Phase::Buffering));
        assert!(tracker.advance(Phase::Recording));
        assert!(!tracker.advance(Phase::Buffering));
        assert!(!tracker.advance(Phase::Recording));
        assert!(tracker.advance(Phase::Saving));
        assert!(tracker.advance(Phase::Done));
        assert_eq!(tracker.progress(), 100.0);
    }

    #[test]
    fn test_error_from_any_non_terminal() {
        for phase in [Phase::Loading, Phase::Buffering, Phase::Recording, Phase::Encoding, Phase::Saving, Phase::Transcoding] {
            let mut tracker = PhaseTracker::new();
            tracker.advance(phase);
            assert!(tracker.advance(Phase::Error), "error must be reachable from {}", phase);
            assert!(!tracker.advance(Phase::Done));
        }
    }

    #[test]
    fn test_terminal_is_sticky() {
        let mut tracker = PhaseTracker::new();
        tracker.advance(Phase::Done);
        assert!(!tracker.advance(Phase::Error));
        assert_eq!(tracker.phase(), Phase::Done);
    }

    #[test]
    fn test_progress_monotonic_and_capped() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.record_progress(10.0), None, "ignored outside recording");

        tracker.advance(Phase::Recording);
        assert_eq!(tracker.record_progress(10.04), Some(10.0));
        assert_eq!(tracker.record_progress(5.0), None);
        assert_eq!(tracker.record_progress(10.05), None);
        assert_eq!(tracker.record_progress(150.0), Some(MAX_PENDING_PROGRESS));
        assert_eq!(tracker.record_progress(f64::NAN), None);
        assert!(tracker.progress() < 100.0);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&Phase::Transcoding).unwrap(), "\"transcoding\"");
        assert_eq!(serde_json::to_string(&ErrorKind::ExportFailed).unwrap(), "\"export_failed\"");
    }
}
