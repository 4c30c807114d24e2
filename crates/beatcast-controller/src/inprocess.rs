//! Workers as tasks inside the controller process.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use beatcast_models::{LaunchUrl, RawArtifact, WorkerStatus};
use beatcast_worker::{
    CaptureFormat, ClockSource, FfmpegCapture, ProtocolConfig, ProtocolParts, RenderProtocol,
    StatusBoard, TitleCardRenderer,
};

use crate::error::{ControllerError, ControllerResult};
use crate::manager::{WorkerHandle, WorkerLauncher};

/// Builds the protocol collaborators for one launch.
pub type PartsFactory = Arc<dyn Fn(&LaunchUrl) -> ProtocolParts + Send + Sync>;

/// Runs the capture protocol on a tokio task per launch.
#[derive(Clone)]
pub struct InProcessLauncher {
    config: ProtocolConfig,
    factory: PartsFactory,
}

impl InProcessLauncher {
    pub fn new(config: ProtocolConfig, factory: PartsFactory) -> Self {
        Self { config, factory }
    }

    /// Title card scene, FFmpeg capture in `format` and a local file source.
    pub fn ffmpeg(config: ProtocolConfig, format: CaptureFormat) -> Self {
        let work_dir = config.work_dir.clone();
        let factory: PartsFactory = Arc::new(move |url: &LaunchUrl| {
            let job = url
                .job_id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "adhoc".to_string());
            ProtocolParts {
                scene: Box::new(TitleCardRenderer::new()),
                capture: Box::new(FfmpegCapture::new(work_dir.join(job).join("capture"), format)),
                source: Box::new(ClockSource::new()),
            }
        });
        Self::new(config, factory)
    }
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self, url: &LaunchUrl) -> ControllerResult<Box<dyn WorkerHandle>> {
        let board = StatusBoard::new();
        let params = url.params();
        let parts = (self.factory)(url);
        let protocol = RenderProtocol::new(self.config.clone(), board.clone(), parts);

        let task = tokio::spawn(async move {
            if let Err(e) = protocol.run(&params).await {
                error!("Render failed: {}", e);
            }
        });
        Ok(Box::new(TaskWorker {
            board,
            task: Some(task),
        }))
    }
}

/// A protocol run on a tokio task. Aborted when dropped.
struct TaskWorker {
    board: StatusBoard,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl WorkerHandle for TaskWorker {
    async fn query(&mut self) -> ControllerResult<WorkerStatus> {
        // Exit is observed first: a task that publishes and then exits
        // between the two reads must still count as settled
        let exited = self.task.as_ref().map_or(true, |task| task.is_finished());
        let status = self.board.snapshot();
        if !status.is_settled() && exited {
            return Err(ControllerError::WorkerGone(
                "render task exited without a result".to_string(),
            ));
        }
        Ok(status)
    }

    async fn fetch_artifact(&mut self) -> ControllerResult<RawArtifact> {
        self.board
            .artifact()
            .ok_or_else(|| ControllerError::artifact("worker has not published an artifact"))
    }

    async fn terminate(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        task.abort();
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                debug!("Render task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for TaskWorker {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatcast_models::{JobId, RenderParams, WorkerPhase};
    use beatcast_worker::{Capture, CaptureSettings, Frame, SourcePlayer, WorkerError, WorkerResult};
    use std::path::PathBuf;

    struct FailingSource;

    #[async_trait]
    impl SourcePlayer for FailingSource {
        async fn load(&mut self, _source: &str) -> WorkerResult<f64> {
            Err(WorkerError::source("unreachable source"))
        }
        fn play(&mut self) {}
        fn position(&self) -> f64 {
            0.0
        }
        fn ended(&self) -> bool {
            false
        }
    }

    struct NullCapture;

    #[async_trait]
    impl Capture for NullCapture {
        async fn start(&mut self, _settings: CaptureSettings) -> WorkerResult<()> {
            Ok(())
        }
        async fn push_frame(&mut self, _frame: &Frame) -> WorkerResult<()> {
            Ok(())
        }
        fn attach_source(&mut self, _audio: Option<PathBuf>, _offset_secs: f64) {}
        async fn finish(&mut self) -> WorkerResult<RawArtifact> {
            Err(WorkerError::capture("nothing captured"))
        }
    }

    async fn exited_worker(board: StatusBoard, publish: bool) -> TaskWorker {
        let publisher = board.clone();
        let task = tokio::spawn(async move {
            if publish {
                publisher.finish(RawArtifact::new(vec![7; 8], "video/webm"));
            }
        });
        while !task.is_finished() {
            tokio::task::yield_now().await;
        }
        TaskWorker {
            board,
            task: Some(task),
        }
    }

    #[tokio::test]
    async fn test_result_published_before_exit_is_reported() {
        let mut worker = exited_worker(StatusBoard::new(), true).await;

        let status = worker.query().await.unwrap();
        assert!(status.done);
        assert_eq!(worker.fetch_artifact().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_exit_without_result_is_worker_gone() {
        let mut worker = exited_worker(StatusBoard::new(), false).await;

        assert!(matches!(
            worker.query().await,
            Err(ControllerError::WorkerGone(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_protocol_is_reported_on_query() {
        let factory: PartsFactory = Arc::new(|_: &LaunchUrl| ProtocolParts {
            scene: Box::new(TitleCardRenderer::new()),
            capture: Box::new(NullCapture),
            source: Box::new(FailingSource),
        });
        let launcher = InProcessLauncher::new(ProtocolConfig::default(), factory);
        let url = LaunchUrl::encode(&JobId::new(), &RenderParams::new("/music/a.wav"));

        let mut worker = launcher.launch(&url).await.unwrap();
        let status = loop {
            let status = worker.query().await.unwrap();
            if status.is_settled() {
                break status;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(status.phase, WorkerPhase::Failed);
        assert!(status.error_detail.unwrap().contains("unreachable source"));
        assert!(worker.fetch_artifact().await.is_err());
        worker.terminate().await;
        worker.terminate().await;
    }
}
