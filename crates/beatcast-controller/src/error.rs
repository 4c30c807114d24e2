//! Controller error types.

use thiserror::Error;

use beatcast_models::ErrorKind;

pub type ControllerResult<T> = Result<T, ControllerError>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Worker launch failed: {0}")]
    LaunchFailed(String),

    #[error("Worker did not become ready within {0} seconds")]
    LaunchTimeout(u64),

    #[error("Worker reported failure: {0}")]
    WorkerFailed(String),

    #[error("Worker exited unexpectedly: {0}")]
    WorkerGone(String),

    #[error("Worker did not finish within {0} seconds")]
    CompletionTimeout(u64),

    #[error("Unexpected worker reply: {0}")]
    Protocol(String),

    #[error("Artifact unavailable: {0}")]
    Artifact(String),

    #[error("Media error: {0}")]
    Media(#[from] beatcast_media::MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] beatcast_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ControllerError {
    pub fn launch_failed(msg: impl Into<String>) -> Self {
        Self::LaunchFailed(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn artifact(msg: impl Into<String>) -> Self {
        Self::Artifact(msg.into())
    }

    /// Error kind reported to the requester.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LaunchFailed(_) | Self::LaunchTimeout(_) => ErrorKind::Unreachable,
            Self::WorkerFailed(_) | Self::WorkerGone(_) | Self::CompletionTimeout(_) => {
                ErrorKind::ExportFailed
            }
            _ => ErrorKind::RenderFailed,
        }
    }
}
