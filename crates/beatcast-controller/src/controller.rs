//! Single-flight job controller.
//!
//! At most one job is active. Submitting a new job cancels the active one,
//! waits until its worker is torn down and only then launches the next
//! worker. Each job runs on its own task and reports to its requester over a
//! bounded channel that carries exactly one terminal event.

use futures_util::stream::{self, Stream};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, Instrument};

use beatcast_media::{FfmpegTranscoder, PostProcessOutcome, PostProcessRequest, PostProcessor};
use beatcast_models::{
    ErrorKind, Job, JobId, LaunchUrl, Phase, PhaseTracker, ProgressEvent, RenderParams,
    WorkerPhase, WorkerStatus,
};
use beatcast_storage::ArtifactStore;

use crate::config::ControllerConfig;
use crate::error::{ControllerError, ControllerResult};
use crate::logging::JobLogger;
use crate::manager::{ManagedWorker, WorkerLauncher, WorkerManager};
use crate::metrics;
use crate::process::ProcessLauncher;

/// Upper bound on delivering the terminal event to a requester that stopped reading.
const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Progress events of one submitted job.
pub struct JobEvents {
    job_id: JobId,
    rx: mpsc::Receiver<ProgressEvent>,
}

impl JobEvents {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Next event; `None` after the terminal event.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        stream::unfold(self, |mut events| async move {
            events.recv().await.map(|event| (event, events))
        })
    }
}

struct ActiveJob {
    id: JobId,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ActiveJob {
    /// Signal cancellation and wait until the job task, and with it the
    /// worker, is gone.
    async fn cancel_and_wait(self) {
        let _ = self.cancel.send(true);
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!(job_id = %self.id, "Job task panicked");
            }
        }
    }
}

/// Accepts render jobs and runs them one at a time.
pub struct JobController {
    runner: JobRunner,
    event_buffer: usize,
    active: Mutex<Option<ActiveJob>>,
}

impl JobController {
    pub fn new(
        config: ControllerConfig,
        launcher: Arc<dyn WorkerLauncher>,
        post: PostProcessor,
    ) -> Self {
        Self {
            runner: JobRunner {
                manager: WorkerManager::new(launcher, config.launch_timeout),
                post: Arc::new(post),
                poll_interval: config.poll_interval,
                completion_timeout: config.completion_timeout,
            },
            event_buffer: config.event_buffer.max(1),
            active: Mutex::new(None),
        }
    }

    /// Child-process workers, FFmpeg transcoding and the export directory
    /// from `config`.
    pub fn from_config(config: ControllerConfig) -> Self {
        let launcher = Arc::new(ProcessLauncher::new(
            &config.worker_binary,
            config.work_dir.join("workers"),
        ));
        let store = Arc::new(ArtifactStore::new(&config.export_dir, &config.export_url_base));
        let mut transcoder = FfmpegTranscoder::new();
        if let Some(timeout) = config.transcode_timeout {
            transcoder = transcoder.with_timeout(timeout.as_secs());
        }
        let post = PostProcessor::new(store, Arc::new(transcoder))
            .with_temp_dir(config.work_dir.join("transcode"));
        Self::new(config, launcher, post)
    }

    pub fn manager(&self) -> &WorkerManager {
        &self.runner.manager
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        self.runner.post.store()
    }

    /// Submit a job, cancelling the active one first.
    ///
    /// Returns once the previous job's worker is torn down and the new job
    /// task is running.
    pub async fn submit(&self, params: RenderParams) -> JobEvents {
        let mut slot = self.active.lock().await;
        if let Some(previous) = slot.take() {
            info!(job_id = %previous.id, "Cancelling active job for new submission");
            previous.cancel_and_wait().await;
        }

        let job = Job::new(params);
        let job_id = job.id.clone();
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let logger = JobLogger::new(&job_id, "render");
        let span = logger.create_span();
        let run = self.runner.clone().run(job, tx, cancel_rx, logger);
        let task = tokio::spawn(run.instrument(span));

        metrics::record_job_submitted();
        *slot = Some(ActiveJob {
            id: job_id.clone(),
            cancel: cancel_tx,
            task,
        });
        JobEvents { job_id, rx }
    }

    /// Id of the running job, if any.
    pub async fn active_job(&self) -> Option<JobId> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|job| !job.task.is_finished())
            .map(|job| job.id.clone())
    }

    /// Cancel the active job and wait for its worker to be torn down.
    pub async fn shutdown(&self) {
        if let Some(active) = self.active.lock().await.take() {
            info!(job_id = %active.id, "Shutting down active job");
            active.cancel_and_wait().await;
        }
    }
}

/// Everything a job task needs, cloned per job.
#[derive(Clone)]
struct JobRunner {
    manager: WorkerManager,
    post: Arc<PostProcessor>,
    poll_interval: Duration,
    completion_timeout: Duration,
}

enum Failure {
    Cancelled,
    Error(ControllerError),
    Panicked,
}

impl JobRunner {
    async fn run(
        self,
        job: Job,
        tx: mpsc::Sender<ProgressEvent>,
        mut cancel: watch::Receiver<bool>,
        logger: JobLogger,
    ) {
        let started = Instant::now();
        logger.log_start(&job.params.source);

        let mut state = JobState {
            job,
            tracker: PhaseTracker::new(),
            tx,
            logger,
        };
        let mut worker: Option<ManagedWorker> = None;

        let outcome = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => Err(Failure::Cancelled),
            result = AssertUnwindSafe(self.drive(&mut state, &mut worker)).catch_unwind() => match result {
                Ok(Ok(outcome)) => Ok(outcome),
                Ok(Err(e)) => Err(Failure::Error(e)),
                Err(_) => Err(Failure::Panicked),
            },
        };

        // The worker goes away before the requester hears the outcome
        if let Some(mut worker) = worker.take() {
            worker.terminate().await;
        }

        match outcome {
            Ok(outcome) => {
                metrics::record_job_completed(started.elapsed().as_secs_f64(), outcome.transcoded);
                state.logger.log_completion(&format!(
                    "{} ({} bytes{})",
                    outcome.info.name,
                    outcome.info.size,
                    if outcome.fell_back { ", raw fallback" } else { "" }
                ));
                state.finish(ProgressEvent::done(outcome.info.url, outcome.info.name)).await;
            }
            Err(failure) => {
                let (kind, detail) = match failure {
                    Failure::Cancelled => (ErrorKind::Cancelled, None),
                    Failure::Error(e) => (e.kind(), Some(e.to_string())),
                    Failure::Panicked => (
                        ErrorKind::RenderFailed,
                        Some("internal controller fault".to_string()),
                    ),
                };
                match &detail {
                    Some(detail) => state.logger.log_error(&format!("{}: {}", kind, detail)),
                    None => state.logger.log_warning("superseded by a newer job"),
                }
                metrics::record_job_failed(kind);
                let progress = state.tracker.progress();
                state.finish(ProgressEvent::error(kind, detail, progress)).await;
            }
        }
    }

    async fn drive(
        &self,
        state: &mut JobState,
        worker: &mut Option<ManagedWorker>,
    ) -> ControllerResult<PostProcessOutcome> {
        state.send(ProgressEvent::phase(Phase::Loading, 0.0)).await;

        let url = LaunchUrl::encode(&state.job.id, &state.job.params);
        let launched = worker.insert(self.manager.launch(&url).await?);
        state.advance(Phase::Buffering).await;

        let polled = tokio::time::timeout(self.completion_timeout, self.poll(launched, state)).await;
        let status = match polled {
            Ok(status) => status?,
            Err(_) => {
                let secs = self.completion_timeout.as_secs();
                return Err(ControllerError::CompletionTimeout(secs));
            }
        };

        let raw = launched.fetch_artifact().await?;
        if raw.is_empty() {
            return Err(ControllerError::artifact("worker produced an empty artifact"));
        }
        if let Some(mut finished) = worker.take() {
            finished.terminate().await;
        }

        state.job.trim_start_secs = status.trim_start_secs;
        state.advance(Phase::Saving).await;
        state.logger.log_progress(&format!(
            "captured {} bytes of {}, trim {:.3}s",
            raw.len(),
            raw.mime,
            status.trim_start_secs
        ));

        let request = PostProcessRequest {
            raw,
            trim_start_secs: status.trim_start_secs,
            output: state.job.params.output.clone(),
        };
        if request.needs_transcode() {
            state.advance(Phase::Transcoding).await;
        }
        Ok(self.post.process(request).await?)
    }

    /// Poll until the worker is done. One query per tick, each awaited
    /// before the next tick.
    async fn poll(
        &self,
        worker: &mut ManagedWorker,
        state: &mut JobState,
    ) -> ControllerResult<WorkerStatus> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let status = worker.query().await?;
            if let Some(detail) = &status.error_detail {
                return Err(ControllerError::WorkerFailed(detail.clone()));
            }

            let finalizing = status.done
                || matches!(status.phase, WorkerPhase::Finalize | WorkerPhase::Finished);
            if status.phase.is_recording() || finalizing {
                state.advance(Phase::Recording).await;
                state.record_progress(status.progress * 100.0).await;
            }
            if finalizing {
                state.advance(Phase::Encoding).await;
            }
            if status.done {
                debug!(trim_start_secs = status.trim_start_secs, "Worker reported done");
                return Ok(status);
            }
        }
    }
}

/// Resolves once cancellation is requested or the controller is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// The job being driven and its requester's channel.
struct JobState {
    job: Job,
    tracker: PhaseTracker,
    tx: mpsc::Sender<ProgressEvent>,
    logger: JobLogger,
}

impl JobState {
    async fn send(&self, event: ProgressEvent) {
        if self.tx.send(event).await.is_err() {
            debug!(job_id = %self.job.id, "Requester stopped listening");
        }
    }

    async fn advance(&mut self, phase: Phase) {
        if self.tracker.advance(phase) {
            self.job.phase = phase;
            self.logger.log_phase(phase, self.tracker.progress());
            self.send(ProgressEvent::phase(phase, self.tracker.progress())).await;
        }
    }

    async fn record_progress(&mut self, pct: f64) {
        if let Some(progress) = self.tracker.record_progress(pct) {
            self.job.progress = progress;
            self.send(ProgressEvent::phase(Phase::Recording, progress)).await;
        }
    }

    /// Emit the terminal event.
    async fn finish(&mut self, event: ProgressEvent) {
        if !self.tracker.advance(event.status) {
            return;
        }
        self.job.phase = event.status;
        self.job.progress = event.progress;
        if self.tx.send_timeout(event, TERMINAL_SEND_TIMEOUT).await.is_err() {
            debug!(job_id = %self.job.id, "Terminal event not delivered");
        }
    }
}
