//! Capture pipeline: codec negotiation and the FFmpeg-backed recorder.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use beatcast_media::{available_encoders, check_ffmpeg, FfmpegCommand, FfmpegRunner};
use beatcast_models::RawArtifact;

use crate::error::{WorkerError, WorkerResult};
use crate::scene::Frame;

/// An encoding the capture pipeline can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub mime: &'static str,
    pub extension: &'static str,
    /// `None` leaves the choice to FFmpeg
    pub video_encoder: Option<&'static str>,
    pub audio_encoder: Option<&'static str>,
}

impl CaptureFormat {
    fn is_supported(&self, encoders: &HashSet<String>) -> bool {
        [self.video_encoder, self.audio_encoder]
            .into_iter()
            .flatten()
            .all(|name| encoders.contains(name))
    }

    /// Encoder options that keep up with realtime capture.
    fn realtime_args(&self) -> &'static [&'static str] {
        match self.video_encoder {
            Some("libvpx-vp9") => &["-deadline", "realtime", "-cpu-used", "8", "-row-mt", "1"],
            Some("libvpx") => &["-deadline", "realtime", "-cpu-used", "8"],
            Some("libx264") => &["-preset", "veryfast", "-tune", "zerolatency"],
            _ => &[],
        }
    }
}

/// Capture encodings in order of preference.
pub const PREFERRED_FORMATS: &[CaptureFormat] = &[
    CaptureFormat {
        mime: "video/webm;codecs=vp9,opus",
        extension: "webm",
        video_encoder: Some("libvpx-vp9"),
        audio_encoder: Some("libopus"),
    },
    CaptureFormat {
        mime: "video/webm;codecs=vp8,opus",
        extension: "webm",
        video_encoder: Some("libvpx"),
        audio_encoder: Some("libopus"),
    },
    CaptureFormat {
        mime: "video/mp4;codecs=avc1,mp4a",
        extension: "mp4",
        video_encoder: Some("libx264"),
        audio_encoder: Some("aac"),
    },
];

/// Used when none of the preferred encodings is available.
pub const RUNTIME_DEFAULT_FORMAT: CaptureFormat = CaptureFormat {
    mime: "video/x-matroska",
    extension: "mkv",
    video_encoder: None,
    audio_encoder: None,
};

/// First preferred format the encoder set supports, else the runtime default.
pub fn negotiate(encoders: &HashSet<String>) -> CaptureFormat {
    PREFERRED_FORMATS
        .iter()
        .find(|format| format.is_supported(encoders))
        .copied()
        .unwrap_or(RUNTIME_DEFAULT_FORMAT)
}

/// Frame geometry and rate of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Records rendered frames into a raw artifact.
#[async_trait]
pub trait Capture: Send {
    async fn start(&mut self, settings: CaptureSettings) -> WorkerResult<()>;

    async fn push_frame(&mut self, frame: &Frame) -> WorkerResult<()>;

    /// The source starts `offset_secs` into the capture timeline.
    fn attach_source(&mut self, audio: Option<PathBuf>, offset_secs: f64);

    /// Stop capturing and return the artifact.
    async fn finish(&mut self) -> WorkerResult<RawArtifact>;

    /// Discard the capture. Safe to call at any point.
    async fn abort(&mut self) {}
}

struct Recording {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: JoinHandle<String>,
    video_path: PathBuf,
}

/// Pipes RGBA frames into FFmpeg and muxes the source audio on finish.
pub struct FfmpegCapture {
    work_dir: PathBuf,
    format: CaptureFormat,
    recording: Option<Recording>,
    audio: Option<(PathBuf, f64)>,
}

impl FfmpegCapture {
    pub fn new(work_dir: impl Into<PathBuf>, format: CaptureFormat) -> Self {
        Self {
            work_dir: work_dir.into(),
            format,
            recording: None,
            audio: None,
        }
    }

    /// Pick the capture format from the encoders FFmpeg reports.
    pub async fn negotiated(work_dir: impl Into<PathBuf>) -> Self {
        let encoders = match available_encoders().await {
            Ok(encoders) => encoders,
            Err(e) => {
                warn!("Encoder discovery failed, using runtime default: {}", e);
                HashSet::new()
            }
        };
        let format = negotiate(&encoders);
        info!(mime = format.mime, "Negotiated capture format");
        Self::new(work_dir, format)
    }

    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    fn scratch_path(&self, label: &str) -> PathBuf {
        self.work_dir.join(format!(
            "capture-{}-{}.{}",
            label,
            uuid::Uuid::new_v4().simple(),
            self.format.extension
        ))
    }

    fn encode_command(&self, settings: CaptureSettings, output: &Path) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new("pipe:0", output)
            .without_progress()
            .input_args(["-f", "rawvideo", "-pix_fmt", "rgba"])
            .input_args(["-s".to_string(), format!("{}x{}", settings.width, settings.height)])
            .input_args(["-r".to_string(), settings.fps.to_string()]);
        if let Some(encoder) = self.format.video_encoder {
            cmd = cmd.video_codec(encoder).output_args(self.format.realtime_args().iter().copied());
        }
        cmd.pixel_format("yuv420p").output_arg("-an")
    }

    async fn mux_audio(&self, video: &Path, audio: &Path, offset_secs: f64) -> WorkerResult<PathBuf> {
        let muxed = self.scratch_path("muxed");
        let mut cmd = FfmpegCommand::new(video, &muxed)
            .extra_input(["-itsoffset".to_string(), format!("{:.3}", offset_secs)], audio)
            .map("0:v:0")
            .map("1:a:0?")
            .video_codec("copy");
        if let Some(encoder) = self.format.audio_encoder {
            cmd = cmd.audio_codec(encoder);
        }
        FfmpegRunner::new().run(&cmd).await?;
        Ok(muxed)
    }
}

#[async_trait]
impl Capture for FfmpegCapture {
    async fn start(&mut self, settings: CaptureSettings) -> WorkerResult<()> {
        if self.recording.is_some() {
            return Err(WorkerError::capture("capture already started"));
        }
        check_ffmpeg()?;
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let video_path = self.scratch_path("video");
        let args = self.encode_command(settings, &video_path).build_args();
        debug!("Starting capture: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::capture("ffmpeg stdin not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| WorkerError::capture("ffmpeg stderr not captured"))?;
        let stderr = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        self.recording = Some(Recording {
            child,
            stdin: Some(stdin),
            stderr,
            video_path,
        });
        Ok(())
    }

    async fn push_frame(&mut self, frame: &Frame) -> WorkerResult<()> {
        let stdin = self
            .recording
            .as_mut()
            .and_then(|r| r.stdin.as_mut())
            .ok_or_else(|| WorkerError::capture("capture is not running"))?;
        stdin
            .write_all(&frame.data)
            .await
            .map_err(|e| WorkerError::capture(format!("failed to write frame to ffmpeg: {}", e)))
    }

    fn attach_source(&mut self, audio: Option<PathBuf>, offset_secs: f64) {
        self.audio = audio.map(|path| (path, offset_secs.max(0.0)));
    }

    async fn finish(&mut self) -> WorkerResult<RawArtifact> {
        let mut recording = self
            .recording
            .take()
            .ok_or_else(|| WorkerError::capture("capture is not running"))?;

        drop(recording.stdin.take());
        let status = recording.child.wait().await?;
        let stderr = recording.stderr.await.unwrap_or_default();
        if !status.success() {
            let _ = tokio::fs::remove_file(&recording.video_path).await;
            return Err(WorkerError::capture(format!(
                "ffmpeg exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        let final_path = match self.audio.take() {
            Some((audio, offset)) => match self.mux_audio(&recording.video_path, &audio, offset).await {
                Ok(muxed) => {
                    let _ = tokio::fs::remove_file(&recording.video_path).await;
                    muxed
                }
                Err(e) => {
                    warn!("Audio mux failed, keeping silent capture: {}", e);
                    recording.video_path.clone()
                }
            },
            None => recording.video_path.clone(),
        };

        let bytes = tokio::fs::read(&final_path).await;
        let _ = tokio::fs::remove_file(&final_path).await;
        let bytes = bytes?;
        info!(size = bytes.len(), mime = self.format.mime, "Capture finished");
        Ok(RawArtifact::new(bytes, self.format.mime))
    }

    async fn abort(&mut self) {
        if let Some(mut recording) = self.recording.take() {
            drop(recording.stdin.take());
            let _ = recording.child.kill().await;
            recording.stderr.abort();
            let _ = tokio::fs::remove_file(&recording.video_path).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoders(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_negotiate_prefers_vp9() {
        let format = negotiate(&encoders(&["libvpx-vp9", "libvpx", "libopus", "libx264", "aac"]));
        assert_eq!(format.mime, "video/webm;codecs=vp9,opus");
    }

    #[test]
    fn test_negotiate_falls_through_in_order() {
        let format = negotiate(&encoders(&["libvpx", "libopus", "libx264", "aac"]));
        assert_eq!(format.video_encoder, Some("libvpx"));

        let format = negotiate(&encoders(&["libvpx-vp9", "libx264", "aac"]));
        assert_eq!(format.extension, "mp4");
    }

    #[test]
    fn test_negotiate_runtime_default() {
        assert_eq!(negotiate(&HashSet::new()), RUNTIME_DEFAULT_FORMAT);
    }

    #[test]
    fn test_encode_command_reads_raw_frames() {
        let capture = FfmpegCapture::new("/tmp/beatcast", PREFERRED_FORMATS[0]);
        let settings = CaptureSettings {
            width: 1920,
            height: 1080,
            fps: 30,
        };
        let args = capture
            .encode_command(settings, Path::new("/tmp/beatcast/out.webm"))
            .build_args();

        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "pipe:0");
        assert!(args[..input].contains(&"rawvideo".to_string()));
        assert!(args[..input].contains(&"1920x1080".to_string()));
        assert!(args[input..].contains(&"libvpx-vp9".to_string()));
        assert!(args[input..].contains(&"-an".to_string()));
    }

    #[tokio::test]
    async fn test_push_before_start_fails() {
        let mut capture = FfmpegCapture::new("/tmp/beatcast", PREFERRED_FORMATS[0]);
        let err = capture.push_frame(&Frame::new(2, 2)).await.unwrap_err();
        assert!(matches!(err, WorkerError::Capture(_)));
        capture.abort().await;
    }
}
