//! Source playback seam.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::{info, warn};

use beatcast_media::probe_media;

use crate::error::{WorkerError, WorkerResult};

/// Plays the audio source the scene reacts to.
#[async_trait]
pub trait SourcePlayer: Send {
    /// Resolve the source completely. Returns its duration in seconds.
    async fn load(&mut self, source: &str) -> WorkerResult<f64>;

    /// Start playback from position zero.
    fn play(&mut self);

    /// Current playback position in seconds.
    fn position(&self) -> f64;

    /// Natural end-of-source signal.
    fn ended(&self) -> bool;

    /// Audio file to mux into the capture, if the source has one.
    fn audio_path(&self) -> Option<PathBuf> {
        None
    }
}

/// Local file source played against the runtime clock.
#[derive(Debug, Default)]
pub struct ClockSource {
    path: Option<PathBuf>,
    has_audio: bool,
    duration: f64,
    started: Option<Instant>,
}

impl ClockSource {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Accept plain paths and `file://` references.
fn resolve_path(source: &str) -> WorkerResult<PathBuf> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(WorkerError::source("empty source reference"));
    }
    let path = trimmed.strip_prefix("file://").unwrap_or(trimmed);
    if path.contains("://") {
        return Err(WorkerError::source(format!("unsupported source scheme: {}", source)));
    }
    Ok(PathBuf::from(path))
}

#[async_trait]
impl SourcePlayer for ClockSource {
    async fn load(&mut self, source: &str) -> WorkerResult<f64> {
        let path = resolve_path(source)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(WorkerError::source(format!("{} does not exist", path.display())));
        }

        let info = probe_media(&path).await?;
        if !info.has_audio {
            warn!(source = %path.display(), "Source has no audio stream");
        }
        info!(source = %path.display(), duration = info.duration, "Source loaded");

        self.has_audio = info.has_audio;
        self.duration = info.duration;
        self.path = Some(path);
        Ok(info.duration)
    }

    fn play(&mut self) {
        self.started = Some(Instant::now());
    }

    fn position(&self) -> f64 {
        self.started
            .map(|start| start.elapsed().as_secs_f64().min(self.duration))
            .unwrap_or(0.0)
    }

    fn ended(&self) -> bool {
        self.started.is_some() && self.position() >= self.duration
    }

    fn audio_path(&self) -> Option<PathBuf> {
        self.path.clone().filter(|_| self.has_audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_resolve_path() {
        assert_eq!(resolve_path("file:///music/a.mp3").unwrap(), PathBuf::from("/music/a.mp3"));
        assert_eq!(resolve_path(" /music/b.wav ").unwrap(), PathBuf::from("/music/b.wav"));
        assert!(resolve_path("https://cdn.example.com/a.mp3").is_err());
        assert!(resolve_path("").is_err());
    }

    #[tokio::test]
    async fn test_missing_source() {
        let mut source = ClockSource::new();
        let err = source.load("/no/such/track.mp3").await.unwrap_err();
        assert!(matches!(err, WorkerError::Source(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_position() {
        let mut source = ClockSource {
            duration: 2.0,
            ..Default::default()
        };
        assert_eq!(source.position(), 0.0);
        assert!(!source.ended());

        source.play();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!((source.position() - 1.5).abs() < 1e-6);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(source.position(), 2.0);
        assert!(source.ended());
    }
}
