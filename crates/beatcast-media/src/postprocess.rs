//! Post-processing of captured artifacts.
//!
//! A raw capture is persisted as-is unless it carries a prebuffer offset or
//! the requested container differs from the capture's own. In that case it
//! is transcoded with an input-level seek. A failed transcode degrades to
//! persisting the raw capture under its native extension.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use beatcast_models::{ArtifactInfo, OutputSpec, RawArtifact};
use beatcast_storage::ArtifactStore;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Pixel format every transcoded export uses.
const OUTPUT_PIXEL_FORMAT: &str = "yuv420p";

/// One transcode invocation.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Seconds to skip at the start of the input (0 = none)
    pub seek_secs: f64,
    pub spec: OutputSpec,
}

/// Converts a file on disk into the requested output format.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, request: &TranscodeRequest) -> MediaResult<()>;
}

/// Transcoder backed by the FFmpeg CLI.
#[derive(Debug, Clone, Default)]
pub struct FfmpegTranscoder {
    timeout_secs: Option<u64>,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound each transcode. Unbounded by default.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// FFmpeg invocation for a request.
    pub fn build_command(request: &TranscodeRequest) -> FfmpegCommand {
        let spec = &request.spec;
        let mut cmd = FfmpegCommand::new(&request.input, &request.output);

        if request.seek_secs > 0.0 {
            cmd = cmd.seek(request.seek_secs);
        }

        cmd = cmd
            .video_codec(spec.codec.ffmpeg_encoder())
            .video_bitrate(spec.video_bitrate_arg())
            .pixel_format(OUTPUT_PIXEL_FORMAT)
            .audio_codec(spec.container.audio_encoder())
            .audio_bitrate(spec.audio_bitrate_arg());

        if spec.container.supports_faststart() {
            cmd = cmd.faststart();
        }

        cmd
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, request: &TranscodeRequest) -> MediaResult<()> {
        let cmd = Self::build_command(request);
        let mut runner = FfmpegRunner::new();
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }

        runner
            .run_with_progress(&cmd, |progress| {
                debug!(
                    out_time_secs = progress.out_time_secs(),
                    speed = progress.speed,
                    "Transcode progress"
                );
            })
            .await
    }
}

/// Input to [`PostProcessor::process`].
#[derive(Debug, Clone)]
pub struct PostProcessRequest {
    pub raw: RawArtifact,
    pub trim_start_secs: f64,
    pub output: OutputSpec,
}

impl PostProcessRequest {
    /// Whether this artifact has to go through the transcoder.
    pub fn needs_transcode(&self) -> bool {
        self.trim_start_secs > 0.0 || self.output.container.extension() != self.raw.native_extension()
    }
}

/// Result of post-processing.
#[derive(Debug, Clone)]
pub struct PostProcessOutcome {
    pub info: ArtifactInfo,
    /// The transcode failed and the raw capture was kept instead
    pub fell_back: bool,
    /// The persisted file is the transcoder's output
    pub transcoded: bool,
}

/// Turns raw captures into persisted exports.
pub struct PostProcessor {
    store: Arc<ArtifactStore>,
    transcoder: Arc<dyn Transcoder>,
    temp_dir: PathBuf,
}

impl PostProcessor {
    pub fn new(store: Arc<ArtifactStore>, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            store,
            transcoder,
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Directory for intermediate files.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    /// Persist `request.raw`, transcoding when
    /// [`needs_transcode`](PostProcessRequest::needs_transcode) says so.
    pub async fn process(&self, request: PostProcessRequest) -> MediaResult<PostProcessOutcome> {
        if request.raw.is_empty() {
            return Err(MediaError::invalid_media("captured artifact is empty"));
        }

        if !request.needs_transcode() {
            let name = self.store.artifact_name(request.raw.native_extension());
            let info = self.store.persist_bytes(&name, &request.raw.bytes).await?;
            return Ok(PostProcessOutcome {
                info,
                fell_back: false,
                transcoded: false,
            });
        }

        match self.transcode_and_persist(&request).await {
            Ok(info) => Ok(PostProcessOutcome {
                info,
                fell_back: false,
                transcoded: true,
            }),
            Err(e) => {
                warn!(
                    error = %e,
                    trim_start_secs = request.trim_start_secs,
                    "Transcode failed, keeping raw capture"
                );
                metrics::counter!("beatcast_transcode_fallbacks_total").increment(1);

                let name = self.store.artifact_name(request.raw.native_extension());
                let info = self.store.persist_bytes(&name, &request.raw.bytes).await?;
                Ok(PostProcessOutcome {
                    info,
                    fell_back: true,
                    transcoded: false,
                })
            }
        }
    }

    async fn transcode_and_persist(&self, request: &PostProcessRequest) -> MediaResult<ArtifactInfo> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let input = self
            .temp_dir
            .join(format!("beatcast-raw-{}.{}", token, request.raw.native_extension()));
        let output = self
            .temp_dir
            .join(format!("beatcast-out-{}.{}", token, request.output.container.extension()));

        let _cleanup = scopeguard::guard((input.clone(), output.clone()), |(input, output)| {
            let _ = std::fs::remove_file(input);
            let _ = std::fs::remove_file(output);
        });

        tokio::fs::create_dir_all(&self.temp_dir).await?;
        tokio::fs::write(&input, &request.raw.bytes).await?;

        let transcode = TranscodeRequest {
            input,
            output: output.clone(),
            seek_secs: request.trim_start_secs.max(0.0),
            spec: request.output.clone(),
        };
        info!(
            seek_secs = transcode.seek_secs,
            container = request.output.container.extension(),
            codec = request.output.codec.as_str(),
            "Transcoding capture"
        );
        self.transcoder.transcode(&transcode).await?;

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(output));
        }

        let name = self.store.artifact_name(request.output.container.extension());
        Ok(self.store.persist_file(&output, &name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatcast_models::Container;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Copies input to output and records every request.
    #[derive(Default)]
    struct CopyTranscoder {
        requests: Mutex<Vec<TranscodeRequest>>,
    }

    #[async_trait]
    impl Transcoder for CopyTranscoder {
        async fn transcode(&self, request: &TranscodeRequest) -> MediaResult<()> {
            self.requests.lock().unwrap().push(request.clone());
            tokio::fs::copy(&request.input, &request.output).await?;
            Ok(())
        }
    }

    struct FailingTranscoder;

    #[async_trait]
    impl Transcoder for FailingTranscoder {
        async fn transcode(&self, _request: &TranscodeRequest) -> MediaResult<()> {
            Err(MediaError::ffmpeg_failed("boom", None, Some(1)))
        }
    }

    fn setup(transcoder: Arc<dyn Transcoder>) -> (TempDir, PostProcessor) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::new(dir.path().join("exports"), "/exports"));
        let processor = PostProcessor::new(store, transcoder).with_temp_dir(dir.path().join("tmp"));
        (dir, processor)
    }

    fn webm_request(trim: f64, container: Container) -> PostProcessRequest {
        PostProcessRequest {
            raw: RawArtifact::new(vec![7; 64], "video/webm;codecs=vp9,opus"),
            trim_start_secs: trim,
            output: OutputSpec {
                container,
                codec: if container == Container::Webm {
                    beatcast_models::VideoCodec::Vp9
                } else {
                    beatcast_models::VideoCodec::H264
                },
                ..OutputSpec::default()
            },
        }
    }

    async fn temp_files(processor: &PostProcessor) -> usize {
        match tokio::fs::read_dir(&processor.temp_dir).await {
            Ok(mut entries) => {
                let mut count = 0;
                while entries.next_entry().await.unwrap().is_some() {
                    count += 1;
                }
                count
            }
            Err(_) => 0,
        }
    }

    #[test]
    fn test_needs_transcode() {
        assert!(!webm_request(0.0, Container::Webm).needs_transcode());
        assert!(webm_request(3.2, Container::Webm).needs_transcode());
        assert!(webm_request(0.0, Container::Mp4).needs_transcode());
    }

    #[test]
    fn test_ffmpeg_command_uses_input_seek() {
        let request = TranscodeRequest {
            input: "/tmp/in.webm".into(),
            output: "/tmp/out.mp4".into(),
            seek_secs: 3.25,
            spec: OutputSpec::default(),
        };
        let args = FfmpegTranscoder::build_command(&request).build_args();
        let seek = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(seek < input);
        assert!(args.contains(&"yuv420p".to_string()));
        assert!(args.contains(&"+faststart".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"8000k".to_string()));
    }

    #[tokio::test]
    async fn test_direct_persist_without_trim() {
        let transcoder = Arc::new(CopyTranscoder::default());
        let (_dir, processor) = setup(transcoder.clone());

        let outcome = processor
            .process(webm_request(0.0, Container::Webm))
            .await
            .unwrap();

        assert!(!outcome.transcoded);
        assert!(!outcome.fell_back);
        assert!(outcome.info.name.ends_with(".webm"));
        assert!(transcoder.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trim_forces_transcode_with_seek() {
        let transcoder = Arc::new(CopyTranscoder::default());
        let (_dir, processor) = setup(transcoder.clone());

        let outcome = processor
            .process(webm_request(3.5, Container::Mp4))
            .await
            .unwrap();

        assert!(outcome.transcoded);
        assert!(outcome.info.name.ends_with(".mp4"));
        let requests = transcoder.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!((requests[0].seek_secs - 3.5).abs() < 1e-9);
        drop(requests);
        assert_eq!(temp_files(&processor).await, 0);
    }

    #[tokio::test]
    async fn test_failed_transcode_falls_back_to_native() {
        let (_dir, processor) = setup(Arc::new(FailingTranscoder));

        let outcome = processor
            .process(webm_request(2.0, Container::Mp4))
            .await
            .unwrap();

        assert!(outcome.fell_back);
        assert!(!outcome.transcoded);
        assert!(outcome.info.name.ends_with(".webm"));
        assert_eq!(outcome.info.size, 64);
        assert_eq!(temp_files(&processor).await, 0);

        let listed = processor.store().list().await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_artifact_is_an_error() {
        let (_dir, processor) = setup(Arc::new(CopyTranscoder::default()));
        let mut request = webm_request(0.0, Container::Webm);
        request.raw.bytes.clear();
        assert!(processor.process(request).await.is_err());
    }
}
