//! Controller configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Interval between worker status queries
    pub poll_interval: Duration,
    /// Time a worker gets to report ready
    pub launch_timeout: Duration,
    /// Outer bound on a worker run
    pub completion_timeout: Duration,
    /// Worker executable
    pub worker_binary: PathBuf,
    /// Scratch directory for workers and transcodes
    pub work_dir: PathBuf,
    /// Directory persisted exports are written to
    pub export_dir: PathBuf,
    /// Public path prefix of persisted exports
    pub export_url_base: String,
    /// Optional bound on a single transcode
    pub transcode_timeout: Option<Duration>,
    /// Log entries replayed to new observers
    pub log_history_capacity: usize,
    /// Buffered progress events per job
    pub event_buffer: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            launch_timeout: Duration::from_secs(30),
            completion_timeout: Duration::from_secs(3 * 60 * 60),
            worker_binary: PathBuf::from("beatcast-worker"),
            work_dir: std::env::temp_dir().join("beatcast"),
            export_dir: PathBuf::from("exports"),
            export_url_base: "/exports".to_string(),
            transcode_timeout: None,
            log_history_capacity: 200,
            event_buffer: 64,
        }
    }
}

impl ControllerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: env_parse("CONTROLLER_POLL_INTERVAL_MS")
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            launch_timeout: env_parse("WORKER_LAUNCH_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.launch_timeout),
            completion_timeout: env_parse("JOB_COMPLETION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.completion_timeout),
            worker_binary: std::env::var("WORKER_BINARY")
                .map(PathBuf::from)
                .unwrap_or(defaults.worker_binary),
            work_dir: std::env::var("BEATCAST_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            export_dir: std::env::var("EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.export_dir),
            export_url_base: std::env::var("EXPORT_URL_BASE").unwrap_or(defaults.export_url_base),
            transcode_timeout: env_parse("TRANSCODE_TIMEOUT_SECS").map(Duration::from_secs),
            log_history_capacity: env_parse("LOG_HISTORY_CAPACITY")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.log_history_capacity),
            event_buffer: env_parse("JOB_EVENT_BUFFER")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.event_buffer),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
