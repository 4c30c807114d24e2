//! Controller/worker contract: the polled status object and stdio control messages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Local stage of the worker's capture protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    #[default]
    Idle,
    Setup,
    Prebuffer,
    Intro,
    Playing,
    Outro,
    Finalize,
    Finished,
    Failed,
}

impl WorkerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerPhase::Idle => "idle",
            WorkerPhase::Setup => "setup",
            WorkerPhase::Prebuffer => "prebuffer",
            WorkerPhase::Intro => "intro",
            WorkerPhase::Playing => "playing",
            WorkerPhase::Outro => "outro",
            WorkerPhase::Finalize => "finalize",
            WorkerPhase::Finished => "finished",
            WorkerPhase::Failed => "failed",
        }
    }

    /// Whether frames are being captured as visible content.
    pub fn is_recording(&self) -> bool {
        matches!(self, WorkerPhase::Intro | WorkerPhase::Playing | WorkerPhase::Outro)
    }
}

/// Snapshot of every field the controller polls, read in one query.
///
/// Unknown fields are ignored and absent ones default, so either side can
/// add fields without breaking the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerStatus {
    pub phase: WorkerPhase,
    /// Set once the artifact is ready
    pub done: bool,
    /// Set when the protocol failed
    pub error_detail: Option<String>,
    pub prebuffering: bool,
    /// Fraction of the visible timeline captured (0.0-1.0)
    pub progress: f64,
    pub artifact_mime: Option<String>,
    pub artifact_size: Option<u64>,
    /// Seconds of warm-up capture at the head of the artifact
    pub trim_start_secs: f64,
}

impl WorkerStatus {
    /// Whether the worker reached a final state (success or failure).
    pub fn is_settled(&self) -> bool {
        self.done || self.error_detail.is_some()
    }
}

/// Command sent from the controller to a worker process (one JSON line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Request one status snapshot
    Status,
    /// Request the artifact location once `done` is set
    Artifact,
    /// Ask the worker to exit
    Shutdown,
}

/// Reply written by a worker process (one JSON line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    /// Emitted once the worker finished initializing
    Ready { pid: u32 },
    Status { status: WorkerStatus },
    Artifact { path: String, mime: String },
    Error { message: String },
}
