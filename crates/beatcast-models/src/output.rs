//! Output encoding specification.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

/// Default short-side resolution in pixels
pub const DEFAULT_RESOLUTION: u32 = 1080;
/// Default frame rate
pub const DEFAULT_FPS: u32 = 30;
/// Default video bitrate (kbit/s)
pub const DEFAULT_VIDEO_BITRATE_KBPS: u32 = 8000;
/// Default audio bitrate (kbit/s)
pub const DEFAULT_AUDIO_BITRATE_KBPS: u32 = 192;

/// Output aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:5")]
    Feed,
}

impl AspectRatio {
    /// Width and height terms of the ratio.
    pub fn terms(&self) -> (u32, u32) {
        match self {
            AspectRatio::Landscape => (16, 9),
            AspectRatio::Portrait => (9, 16),
            AspectRatio::Square => (1, 1),
            AspectRatio::Feed => (4, 5),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
            AspectRatio::Feed => "4:5",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "16:9" => Ok(AspectRatio::Landscape),
            "9:16" => Ok(AspectRatio::Portrait),
            "1:1" => Ok(AspectRatio::Square),
            "4:5" => Ok(AspectRatio::Feed),
            other => Err(format!("unknown aspect ratio: {}", other)),
        }
    }
}

/// Target video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
    Vp9,
    Av1,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Av1 => "av1",
        }
    }

    /// FFmpeg encoder used for this codec.
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::Av1 => "libsvtav1",
        }
    }
}

impl FromStr for VideoCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "h264" | "avc" => Ok(VideoCodec::H264),
            "h265" | "hevc" => Ok(VideoCodec::H265),
            "vp9" => Ok(VideoCodec::Vp9),
            "av1" => Ok(VideoCodec::Av1),
            other => Err(format!("unknown video codec: {}", other)),
        }
    }
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Webm,
    Mkv,
    Mov,
}

impl Container {
    /// File extension (without the dot).
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
            Container::Mkv => "mkv",
            Container::Mov => "mov",
        }
    }

    /// Resolve a container from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "mp4" | "m4v" => Some(Container::Mp4),
            "webm" => Some(Container::Webm),
            "mkv" => Some(Container::Mkv),
            "mov" => Some(Container::Mov),
            _ => None,
        }
    }

    /// Audio encoder that fits this container.
    pub fn audio_encoder(&self) -> &'static str {
        match self {
            Container::Webm => "libopus",
            Container::Mp4 | Container::Mkv | Container::Mov => "aac",
        }
    }

    /// Whether the moov atom can be moved to the front for progressive playback.
    pub fn supports_faststart(&self) -> bool {
        matches!(self, Container::Mp4 | Container::Mov)
    }

    /// Whether the container can carry the given video codec.
    pub fn accepts(&self, codec: VideoCodec) -> bool {
        match self {
            Container::Webm => matches!(codec, VideoCodec::Vp9 | VideoCodec::Av1),
            Container::Mp4 | Container::Mkv | Container::Mov => true,
        }
    }
}

impl FromStr for Container {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Container::from_extension(s).ok_or_else(|| format!("unknown container: {}", s))
    }
}

/// Output specification for a render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_codec_container"))]
pub struct OutputSpec {
    #[serde(default)]
    pub aspect: AspectRatio,

    /// Short-side resolution in pixels
    #[serde(default = "default_resolution")]
    #[validate(range(min = 144, max = 4320))]
    pub resolution: u32,

    #[serde(default = "default_fps")]
    #[validate(range(min = 1, max = 120))]
    pub fps: u32,

    #[serde(default)]
    pub codec: VideoCodec,

    #[serde(default = "default_video_bitrate")]
    #[validate(range(min = 100, max = 200_000))]
    pub video_bitrate_kbps: u32,

    #[serde(default = "default_audio_bitrate")]
    #[validate(range(min = 32, max = 1024))]
    pub audio_bitrate_kbps: u32,

    #[serde(default)]
    pub container: Container,
}

fn default_resolution() -> u32 {
    DEFAULT_RESOLUTION
}
fn default_fps() -> u32 {
    DEFAULT_FPS
}
fn default_video_bitrate() -> u32 {
    DEFAULT_VIDEO_BITRATE_KBPS
}
fn default_audio_bitrate() -> u32 {
    DEFAULT_AUDIO_BITRATE_KBPS
}

fn validate_codec_container(spec: &OutputSpec) -> Result<(), ValidationError> {
    if spec.container.accepts(spec.codec) {
        Ok(())
    } else {
        let mut err = ValidationError::new("codec_container");
        err.message = Some(
            format!(
                "{} cannot be stored in a {} container",
                spec.codec.as_str(),
                spec.container.extension()
            )
            .into(),
        );
        Err(err)
    }
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            aspect: AspectRatio::default(),
            resolution: DEFAULT_RESOLUTION,
            fps: DEFAULT_FPS,
            codec: VideoCodec::default(),
            video_bitrate_kbps: DEFAULT_VIDEO_BITRATE_KBPS,
            audio_bitrate_kbps: DEFAULT_AUDIO_BITRATE_KBPS,
            container: Container::default(),
        }
    }
}

impl OutputSpec {
    /// Frame dimensions (width, height), both even for yuv420p output.
    pub fn dimensions(&self) -> (u32, u32) {
        let (w, h) = self.aspect.terms();
        let short = self.resolution.max(2);
        let (width, height) = if w >= h {
            (short * w / h, short)
        } else {
            (short, short * h / w)
        };
        (even(width), even(height))
    }

    /// Video bitrate as an FFmpeg argument (e.g. "8000k").
    pub fn video_bitrate_arg(&self) -> String {
        format!("{}k", self.video_bitrate_kbps)
    }

    /// Audio bitrate as an FFmpeg argument (e.g. "192k").
    pub fn audio_bitrate_arg(&self) -> String {
        format!("{}k", self.audio_bitrate_kbps)
    }
}

fn even(v: u32) -> u32 {
    (v / 2 * 2).max(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec() {
        let spec = OutputSpec::default();
        assert_eq!(spec.dimensions(), (1920, 1080));
        assert_eq!(spec.video_bitrate_arg(), "8000k");
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_portrait_dimensions_are_even() {
        let spec = OutputSpec {
            aspect: AspectRatio::Portrait,
            resolution: 721,
            ..Default::default()
        };
        let (w, h) = spec.dimensions();
        assert_eq!(w % 2, 0);
        assert_eq!(h % 2, 0);
        assert!(h > w);
    }

    #[test]
    fn test_webm_rejects_h264() {
        let spec = OutputSpec {
            container: Container::Webm,
            codec: VideoCodec::H264,
            ..Default::default()
        };
        assert!(spec.validate().is_err());

        let spec = OutputSpec {
            container: Container::Webm,
            codec: VideoCodec::Vp9,
            ..Default::default()
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_parse_from_strings() {
        assert_eq!("9:16".parse::<AspectRatio>().unwrap(), AspectRatio::Portrait);
        assert_eq!("HEVC".parse::<VideoCodec>().unwrap(), VideoCodec::H265);
        assert_eq!(".webm".parse::<Container>().unwrap(), Container::Webm);
        assert!("avi".parse::<Container>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&AspectRatio::Square).unwrap();
        assert_eq!(json, "\"1:1\"");
        let spec: OutputSpec = serde_json::from_str(r#"{"fps": 60, "container": "mov"}"#).unwrap();
        assert_eq!(spec.fps, 60);
        assert_eq!(spec.container, Container::Mov);
        assert_eq!(spec.resolution, DEFAULT_RESOLUTION);
    }
}
