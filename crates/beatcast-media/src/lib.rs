//! FFmpeg CLI wrapper and artifact post-processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Timeout support via tokio
//! - Source probing and encoder discovery
//! - The post-processor that trims/transcodes captured artifacts

pub mod command;
pub mod encoders;
pub mod error;
pub mod postprocess;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use encoders::{available_encoders, parse_encoder_list};
pub use error::{MediaError, MediaResult};
pub use postprocess::{
    FfmpegTranscoder, PostProcessOutcome, PostProcessRequest, PostProcessor, TranscodeRequest,
    Transcoder,
};
pub use probe::{probe_media, MediaInfo};
pub use progress::FfmpegProgress;
