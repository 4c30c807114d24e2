//! Encoder discovery.

use std::collections::HashSet;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::command::check_ffmpeg;
use crate::error::{MediaError, MediaResult};

/// Names of the encoders the local FFmpeg build provides.
pub async fn available_encoders() -> MediaResult<HashSet<String>> {
    check_ffmpeg()?;

    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::ffmpeg_failed(
            "Failed to list encoders",
            Some(String::from_utf8_lossy(&output.stderr).to_string()),
            output.status.code(),
        ));
    }

    let encoders = parse_encoder_list(&String::from_utf8_lossy(&output.stdout));
    debug!(count = encoders.len(), "Discovered FFmpeg encoders");
    Ok(encoders)
}

/// Parse `ffmpeg -encoders` output.
///
/// Entries follow a `------` separator and look like
/// ` V....D libx264   libx264 H.264 / AVC`.
pub fn parse_encoder_list(output: &str) -> HashSet<String> {
    output
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            (flags.len() == 6).then(|| name.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC
 V....D libvpx-vp9           libvpx VP9 (codec vp9)
 A....D libopus              libopus Opus (codec opus)
 A....D aac                  AAC (Advanced Audio Coding)
";

    #[test]
    fn test_parse_encoder_list() {
        let encoders = parse_encoder_list(SAMPLE);
        assert_eq!(encoders.len(), 4);
        assert!(encoders.contains("libx264"));
        assert!(encoders.contains("libopus"));
        assert!(!encoders.contains("="));
    }

    #[test]
    fn test_parse_without_separator_is_empty() {
        assert!(parse_encoder_list("garbage\nmore garbage").is_empty());
    }
}
