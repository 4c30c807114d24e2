//! Shared data models for the beatcast render orchestrator.
//!
//! This crate provides Serde-serializable types for:
//! - Render jobs, output specs and the worker launch locator
//! - Job phases and progress events streamed to requesters
//! - The worker status snapshot and its stdio control messages
//! - Artifacts and operational log entries

pub mod artifact;
pub mod event;
pub mod job;
pub mod launch;
pub mod log;
pub mod output;
pub mod phase;
pub mod worker;

// Re-export common types
pub use artifact::{extension_for_mime, ArtifactInfo, RawArtifact};
pub use event::ProgressEvent;
pub use job::{Job, JobId, RenderParams, VisualConfig};
pub use launch::{LaunchUrl, LaunchUrlError};
pub use log::{LogEntry, LogLevel};
pub use output::{AspectRatio, Container, OutputSpec, VideoCodec};
pub use phase::{ErrorKind, Phase, PhaseTracker};
pub use worker::{WorkerCommand, WorkerPhase, WorkerReply, WorkerStatus};
