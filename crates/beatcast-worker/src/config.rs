//! Protocol tuning.

use std::path::PathBuf;
use std::time::Duration;

/// Tuning for the phased capture protocol.
///
/// These values were picked empirically; all of them can be overridden
/// from the environment.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Frames rendered into the capture before the hold starts
    pub prebuffer_frames: u32,
    /// Hold after the prebuffer frames, still capturing
    pub prebuffer_delay: Duration,
    /// Playback counts as finished this close to the source duration
    pub end_epsilon_secs: f64,
    /// Extra time past the source duration before playback is abandoned
    pub playback_slack: Duration,
    /// Scratch directory for capture files
    pub work_dir: PathBuf,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            prebuffer_frames: 300,
            prebuffer_delay: Duration::from_millis(3000),
            end_epsilon_secs: 0.05,
            playback_slack: Duration::from_secs(10),
            work_dir: std::env::temp_dir().join("beatcast"),
        }
    }
}

impl ProtocolConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            prebuffer_frames: env_parse("WORKER_PREBUFFER_FRAMES").unwrap_or(defaults.prebuffer_frames),
            prebuffer_delay: env_parse("WORKER_PREBUFFER_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.prebuffer_delay),
            end_epsilon_secs: env_parse("WORKER_END_EPSILON_SECS")
                .filter(|v: &f64| v.is_finite() && *v >= 0.0)
                .unwrap_or(defaults.end_epsilon_secs),
            playback_slack: env_parse("WORKER_PLAYBACK_SLACK_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.playback_slack),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
