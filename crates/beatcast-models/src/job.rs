//! Render job definitions.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use crate::output::OutputSpec;
use crate::phase::Phase;

/// Default title card duration before playback.
pub const DEFAULT_INTRO_SECS: f64 = 3.0;
/// Default closing frame duration after playback.
pub const DEFAULT_OUTRO_SECS: f64 = 3.0;

/// Opaque visual configuration handed to the scene renderer as-is.
pub type VisualConfig = serde_json::Map<String, serde_json::Value>;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameters of a render request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RenderParams {
    /// Source reference (audio file path or URL)
    #[validate(length(min = 1, message = "source must not be empty"))]
    pub source: String,

    /// Output encoding
    #[serde(default)]
    #[validate(nested)]
    pub output: OutputSpec,

    /// Title card duration before playback starts
    #[serde(default = "default_intro_secs")]
    #[validate(range(min = 0.0, max = 60.0))]
    pub intro_secs: f64,

    /// Closing frame duration after playback ends
    #[serde(default = "default_outro_secs")]
    #[validate(range(min = 0.0, max = 60.0))]
    pub outro_secs: f64,

    /// Visual configuration payload
    #[serde(default)]
    pub visual: VisualConfig,
}

fn default_intro_secs() -> f64 {
    DEFAULT_INTRO_SECS
}
fn default_outro_secs() -> f64 {
    DEFAULT_OUTRO_SECS
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            source: String::new(),
            output: OutputSpec::default(),
            intro_secs: DEFAULT_INTRO_SECS,
            outro_secs: DEFAULT_OUTRO_SECS,
            visual: VisualConfig::new(),
        }
    }
}

impl RenderParams {
    /// Create parameters for a source with default output settings.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.output = output;
        self
    }

    pub fn with_intro_outro(mut self, intro_secs: f64, outro_secs: f64) -> Self {
        self.intro_secs = intro_secs;
        self.outro_secs = outro_secs;
        self
    }

    pub fn with_visual(mut self, visual: VisualConfig) -> Self {
        self.visual = visual;
        self
    }
}

/// The singleton active render job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub params: RenderParams,
    /// Current lifecycle phase
    pub phase: Phase,
    /// Progress percentage (0-100)
    pub progress: f64,
    /// Prebuffered seconds to cut from the captured artifact
    pub trim_start_secs: f64,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job in the `Loading` phase.
    pub fn new(params: RenderParams) -> Self {
        Self {
            id: JobId::new(),
            params,
            phase: Phase::Loading,
            progress: 0.0,
            trim_start_secs: 0.0,
            created_at: Utc::now(),
        }
    }
}
