//! Workers as child processes.
//!
//! The worker binary receives the launch URL as its only argument and speaks
//! line-delimited JSON on stdio: one [`WorkerCommand`] in, one
//! [`WorkerReply`] out. Its stderr is forwarded into our tracing output.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use beatcast_models::{LaunchUrl, RawArtifact, WorkerCommand, WorkerReply, WorkerStatus};

use crate::error::{ControllerError, ControllerResult};
use crate::manager::{WorkerHandle, WorkerLauncher};

/// Time a worker gets to exit after a shutdown request.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

/// Spawns the worker binary per launch.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    binary: PathBuf,
    work_dir: PathBuf,
}

impl ProcessLauncher {
    pub fn new(binary: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            work_dir: work_dir.into(),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, url: &LaunchUrl) -> ControllerResult<Box<dyn WorkerHandle>> {
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let mut child = Command::new(&self.binary)
            .arg(url.as_str())
            .env("WORKER_WORK_DIR", &self.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ControllerError::launch_failed(format!("{}: {}", self.binary.display(), e))
            })?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ControllerError::launch_failed("worker stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ControllerError::launch_failed("worker stdout not captured"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        info!(target: "beatcast::worker", pid, "{}", line);
                    }
                }
            });
        }

        let mut worker = ProcessWorker {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout).lines(),
        };

        // Initialization finishes with the ready line
        match worker.read_reply().await {
            Ok(WorkerReply::Ready { pid }) => {
                debug!(pid, "Worker process initialized");
                Ok(Box::new(worker))
            }
            Ok(other) => {
                worker.terminate().await;
                Err(ControllerError::launch_failed(format!(
                    "expected ready, got {:?}",
                    other
                )))
            }
            Err(e) => {
                worker.terminate().await;
                Err(ControllerError::launch_failed(e.to_string()))
            }
        }
    }
}

/// A running worker process.
pub struct ProcessWorker {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ProcessWorker {
    async fn send(&mut self, command: &WorkerCommand) -> ControllerResult<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ControllerError::WorkerGone("control channel closed".to_string()))?;
        let mut line = serde_json::to_vec(command)?;
        line.push(b'\n');
        let written = async {
            stdin.write_all(&line).await?;
            stdin.flush().await
        };
        written
            .await
            .map_err(|e| ControllerError::WorkerGone(format!("control channel write failed: {}", e)))
    }

    async fn read_reply(&mut self) -> ControllerResult<WorkerReply> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|e| ControllerError::WorkerGone(e.to_string()))?
                .ok_or_else(|| ControllerError::WorkerGone("worker closed its output".to_string()))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line)
                .map_err(|e| ControllerError::protocol(format!("{}: {}", e, line)));
        }
    }

    /// One request, one reply. `&mut self` keeps requests from overlapping.
    async fn request(&mut self, command: WorkerCommand) -> ControllerResult<WorkerReply> {
        self.send(&command).await?;
        self.read_reply().await
    }
}

#[async_trait]
impl WorkerHandle for ProcessWorker {
    async fn query(&mut self) -> ControllerResult<WorkerStatus> {
        match self.request(WorkerCommand::Status).await? {
            WorkerReply::Status { status } => Ok(status),
            WorkerReply::Error { message } => Err(ControllerError::protocol(message)),
            other => Err(ControllerError::protocol(format!("expected status, got {:?}", other))),
        }
    }

    async fn fetch_artifact(&mut self) -> ControllerResult<RawArtifact> {
        match self.request(WorkerCommand::Artifact).await? {
            WorkerReply::Artifact { path, mime } => {
                let bytes = tokio::fs::read(&path).await;
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!(path = %path, "Failed to remove handed-over artifact: {}", e);
                }
                let bytes =
                    bytes.map_err(|e| ControllerError::artifact(format!("{}: {}", path, e)))?;
                Ok(RawArtifact::new(bytes, mime))
            }
            WorkerReply::Error { message } => Err(ControllerError::artifact(message)),
            other => Err(ControllerError::protocol(format!("expected artifact, got {:?}", other))),
        }
    }

    async fn terminate(&mut self) {
        if self.send(&WorkerCommand::Shutdown).await.is_ok() {
            self.stdin.take();
            if let Ok(Ok(status)) = tokio::time::timeout(SHUTDOWN_GRACE, self.child.wait()).await {
                debug!(%status, "Worker exited");
                return;
            }
        }
        self.stdin.take();
        match self.child.kill().await {
            Ok(()) => debug!("Worker killed"),
            // Already reaped
            Err(e) => debug!("Worker kill: {}", e),
        }
    }
}
