//! Progress reported by FFmpeg's `-progress` blocks.

use serde::{Deserialize, Serialize};

/// Snapshot of one `-progress` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Frames written so far
    pub frame: u64,
    /// Current encode FPS
    pub fps: f64,
    /// Output timestamp in milliseconds
    pub out_time_ms: i64,
    /// Output timestamp as `HH:MM:SS.micro`
    pub out_time: String,
    /// Encode speed relative to realtime
    pub speed: f64,
    /// Set on the final `progress=end` block
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Output position in seconds.
    pub fn out_time_secs(&self) -> f64 {
        self.out_time_ms.max(0) as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_time_secs_ignores_negative_timestamps() {
        let mut progress = FfmpegProgress {
            out_time_ms: 15_250,
            ..Default::default()
        };
        assert!((progress.out_time_secs() - 15.25).abs() < 1e-9);
        progress.out_time_ms = -1;
        assert_eq!(progress.out_time_secs(), 0.0);
    }
}
