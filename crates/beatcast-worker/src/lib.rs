//! Rendering worker.
//!
//! A worker executes one render job: it configures the scene, warms up the
//! capture pipeline, plays the source with intro and outro frames around it
//! and finalizes a raw artifact. Progress is published on a [`StatusBoard`]
//! that the controller polls, in-process or through the stdio control
//! channel in [`ipc`].

pub mod capture;
pub mod config;
pub mod error;
pub mod ipc;
pub mod protocol;
pub mod scene;
pub mod source;
pub mod status;

pub use capture::{negotiate, Capture, CaptureFormat, CaptureSettings, FfmpegCapture, PREFERRED_FORMATS};
pub use config::ProtocolConfig;
pub use error::{WorkerError, WorkerResult};
pub use protocol::{ProtocolParts, RenderProtocol};
pub use scene::{Frame, FrameContext, FrameStage, SceneRenderer, TitleCardRenderer};
pub use source::{ClockSource, SourcePlayer};
pub use status::StatusBoard;
