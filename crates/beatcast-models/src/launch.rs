//! Launch locator carrying job parameters to a worker.
//!
//! Parameters travel as query pairs on a `beatcast://render` URL. Decoding is
//! lenient: unknown keys are skipped and missing, malformed or out-of-range
//! values fall back to their defaults.

use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;
use url::Url;

use crate::job::{JobId, RenderParams, VisualConfig};
use crate::output::VideoCodec;

pub const LAUNCH_SCHEME: &str = "beatcast";
const LAUNCH_BASE: &str = "beatcast://render";

// Same bounds as the `Validate` rules on `OutputSpec` and `RenderParams`
const RESOLUTION_RANGE: RangeInclusive<u32> = 144..=4320;
const FPS_RANGE: RangeInclusive<u32> = 1..=120;
const VIDEO_BITRATE_RANGE: RangeInclusive<u32> = 100..=200_000;
const AUDIO_BITRATE_RANGE: RangeInclusive<u32> = 32..=1024;
const CARD_SECS_RANGE: RangeInclusive<f64> = 0.0..=60.0;

#[derive(Debug, Error)]
pub enum LaunchUrlError {
    #[error("Invalid launch URL: {0}")]
    Invalid(#[from] url::ParseError),

    #[error("Unexpected launch URL scheme: {0}")]
    Scheme(String),
}

/// Request locator for one worker launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchUrl(Url);

impl LaunchUrl {
    /// Encode a job into a launch URL.
    pub fn encode(job_id: &JobId, params: &RenderParams) -> Self {
        let mut url = Url::parse(LAUNCH_BASE).expect("static launch base is a valid URL");
        {
            let out = &params.output;
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("job", job_id.as_str())
                .append_pair("source", &params.source)
                .append_pair("aspect", out.aspect.as_str())
                .append_pair("resolution", &out.resolution.to_string())
                .append_pair("fps", &out.fps.to_string())
                .append_pair("codec", out.codec.as_str())
                .append_pair("vbr", &out.video_bitrate_kbps.to_string())
                .append_pair("abr", &out.audio_bitrate_kbps.to_string())
                .append_pair("container", out.container.extension())
                .append_pair("intro", &params.intro_secs.to_string())
                .append_pair("outro", &params.outro_secs.to_string());
            if !params.visual.is_empty() {
                let visual = serde_json::Value::Object(params.visual.clone()).to_string();
                pairs.append_pair("visual", &visual);
            }
        }
        Self(url)
    }

    /// Parse a launch URL string.
    pub fn parse(s: &str) -> Result<Self, LaunchUrlError> {
        let url = Url::parse(s)?;
        if url.scheme() != LAUNCH_SCHEME {
            return Err(LaunchUrlError::Scheme(url.scheme().to_string()));
        }
        Ok(Self(url))
    }

    /// Job identifier, if present.
    pub fn job_id(&self) -> Option<JobId> {
        self.0
            .query_pairs()
            .find(|(k, _)| k == "job")
            .map(|(_, v)| JobId::from_string(v.into_owned()))
            .filter(|id| !id.as_str().is_empty())
    }

    /// Decode the render parameters, defaulting anything absent, malformed or
    /// out of range. The result always passes validation apart from `source`.
    pub fn params(&self) -> RenderParams {
        let mut params = RenderParams::default();
        for (key, value) in self.0.query_pairs() {
            let value = value.as_ref();
            let out = &mut params.output;
            match key.as_ref() {
                "source" => params.source = value.to_string(),
                "aspect" => set_parsed(&mut out.aspect, value),
                "resolution" => set_in_range(&mut out.resolution, value, RESOLUTION_RANGE),
                "fps" => set_in_range(&mut out.fps, value, FPS_RANGE),
                "codec" => set_parsed(&mut out.codec, value),
                "vbr" => set_in_range(&mut out.video_bitrate_kbps, value, VIDEO_BITRATE_RANGE),
                "abr" => set_in_range(&mut out.audio_bitrate_kbps, value, AUDIO_BITRATE_RANGE),
                "container" => set_parsed(&mut out.container, value),
                "intro" => set_in_range(&mut params.intro_secs, value, CARD_SECS_RANGE),
                "outro" => set_in_range(&mut params.outro_secs, value, CARD_SECS_RANGE),
                "visual" => {
                    if let Ok(visual) = serde_json::from_str::<VisualConfig>(value) {
                        params.visual = visual;
                    }
                }
                _ => {}
            }
        }
        // VP9 fits every container
        if !params.output.container.accepts(params.output.codec) {
            params.output.codec = VideoCodec::Vp9;
        }
        params
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: &str) {
    if let Ok(parsed) = value.parse() {
        *slot = parsed;
    }
}

/// Like [`set_parsed`], but keeps the default unless the value lies in
/// `range`. NaN never does.
fn set_in_range<T>(slot: &mut T, value: &str, range: RangeInclusive<T>)
where
    T: std::str::FromStr + PartialOrd,
{
    if let Ok(parsed) = value.parse::<T>() {
        if range.contains(&parsed) {
            *slot = parsed;
        }
    }
}

impl fmt::Display for LaunchUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}
