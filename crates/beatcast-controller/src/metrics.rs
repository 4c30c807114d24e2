//! Job and worker metrics.

use metrics::{counter, gauge, histogram};

use beatcast_models::ErrorKind;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "beatcast_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "beatcast_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "beatcast_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "beatcast_job_duration_seconds";

    pub const WORKERS_LIVE: &str = "beatcast_workers_live";
    pub const WORKER_LAUNCHES_TOTAL: &str = "beatcast_worker_launches_total";
    pub const WORKER_POLLS_TOTAL: &str = "beatcast_worker_polls_total";
}

/// Record a job submission.
pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

/// Record a job that reached `done`.
pub fn record_job_completed(duration_secs: f64, transcoded: bool) {
    let labels = [("transcoded", transcoded.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

/// Record a job that ended in error.
pub fn record_job_failed(kind: ErrorKind) {
    let labels = [("kind", kind.as_str().to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record a worker launch attempt.
pub fn record_worker_launch(success: bool) {
    let labels = [("result", if success { "ok" } else { "failed" }.to_string())];
    counter!(names::WORKER_LAUNCHES_TOTAL, &labels).increment(1);
}

/// Update the live workers gauge.
pub fn set_live_workers(count: usize) {
    gauge!(names::WORKERS_LIVE).set(count as f64);
}

pub fn record_worker_poll() {
    counter!(names::WORKER_POLLS_TOTAL).increment(1);
}
