//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Render protocol already started")]
    AlreadyStarted,

    #[error("Source unavailable: {0}")]
    Source(String),

    #[error("Invalid visual configuration: {0}")]
    Configure(String),

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Invalid launch request: {0}")]
    InvalidLaunch(String),

    #[error("Media error: {0}")]
    Media(#[from] beatcast_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    pub fn configure(msg: impl Into<String>) -> Self {
        Self::Configure(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }
}
