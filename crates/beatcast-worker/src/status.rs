//! Shared status board polled by the controller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use beatcast_models::{RawArtifact, WorkerPhase, WorkerStatus};

#[derive(Debug, Default)]
struct BoardState {
    status: WorkerStatus,
    artifact: Option<RawArtifact>,
}

/// The worker's published state.
///
/// Every field the controller needs lives behind one lock so a
/// [`snapshot`](Self::snapshot) is a single consistent read.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<BoardState>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One batched read of all polled fields.
    pub fn snapshot(&self) -> WorkerStatus {
        self.state().status.clone()
    }

    pub fn set_phase(&self, phase: WorkerPhase) {
        let mut state = self.state();
        state.status.phase = phase;
        state.status.prebuffering = phase == WorkerPhase::Prebuffer;
    }

    pub fn set_progress(&self, progress: f64) {
        let mut state = self.state();
        let progress = progress.clamp(0.0, 1.0);
        if progress > state.status.progress {
            state.status.progress = progress;
        }
    }

    /// Record the warm-up offset measured at the end of the prebuffer.
    pub fn set_trim_start(&self, secs: f64) {
        self.state().status.trim_start_secs = secs.max(0.0);
    }

    /// Publish the finished artifact and mark the worker done.
    pub fn finish(&self, artifact: RawArtifact) {
        let mut state = self.state();
        state.status.phase = WorkerPhase::Finished;
        state.status.prebuffering = false;
        state.status.progress = 1.0;
        state.status.artifact_mime = Some(artifact.mime.clone());
        state.status.artifact_size = Some(artifact.len() as u64);
        state.status.done = true;
        state.artifact = Some(artifact);
    }

    /// Mark the protocol failed. `done` stays false.
    pub fn fail(&self, detail: impl Into<String>) {
        let mut state = self.state();
        state.status.phase = WorkerPhase::Failed;
        state.status.prebuffering = false;
        state.status.done = false;
        state.status.error_detail = Some(detail.into());
    }

    /// The published artifact, if any.
    pub fn artifact(&self) -> Option<RawArtifact> {
        self.state().artifact.clone()
    }
}
