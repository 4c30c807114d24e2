//! Worker lifecycle management.
//!
//! A [`WorkerLauncher`] knows how to bring up one rendering worker for a
//! launch URL; the [`WorkerManager`] wraps it with the launch timeout and
//! keeps count of live workers so single-flight can be observed.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use beatcast_models::{LaunchUrl, RawArtifact, WorkerStatus};

use crate::error::{ControllerError, ControllerResult};
use crate::metrics;

/// Control surface of one running worker.
#[async_trait]
pub trait WorkerHandle: Send {
    /// One batched read of the worker's published state.
    async fn query(&mut self) -> ControllerResult<WorkerStatus>;

    /// Extract the finished artifact. Only meaningful once `done` is set.
    async fn fetch_artifact(&mut self) -> ControllerResult<RawArtifact>;

    /// Stop the worker and release everything it holds.
    /// Must tolerate a worker that already exited.
    async fn terminate(&mut self);
}

/// Starts rendering workers.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Launch a worker and return once it finished initializing.
    async fn launch(&self, url: &LaunchUrl) -> ControllerResult<Box<dyn WorkerHandle>>;
}

#[derive(Debug, Default)]
struct LiveCounter {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl LiveCounter {
    fn acquire(self: &Arc<Self>) -> LiveGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        metrics::set_live_workers(now);
        LiveGuard {
            counter: Arc::clone(self),
        }
    }
}

/// Counts one live worker until dropped.
#[derive(Debug)]
struct LiveGuard {
    counter: Arc<LiveCounter>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let now = self.counter.current.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_live_workers(now);
    }
}

/// Launches workers and tracks how many are alive.
#[derive(Clone)]
pub struct WorkerManager {
    launcher: Arc<dyn WorkerLauncher>,
    launch_timeout: Duration,
    live: Arc<LiveCounter>,
}

impl WorkerManager {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, launch_timeout: Duration) -> Self {
        Self {
            launcher,
            launch_timeout,
            live: Arc::new(LiveCounter::default()),
        }
    }

    /// Launch a worker, failing if it is not ready within the launch timeout.
    pub async fn launch(&self, url: &LaunchUrl) -> ControllerResult<ManagedWorker> {
        // A half-started worker counts as live
        let guard = self.live.acquire();

        let launched = tokio::time::timeout(self.launch_timeout, self.launcher.launch(url)).await;
        match launched {
            Ok(Ok(handle)) => {
                metrics::record_worker_launch(true);
                info!(live = self.live_workers(), "Worker ready");
                Ok(ManagedWorker {
                    handle: Some(handle),
                    guard: Some(guard),
                })
            }
            Ok(Err(e)) => {
                metrics::record_worker_launch(false);
                warn!("Worker launch failed: {}", e);
                Err(e)
            }
            Err(_) => {
                metrics::record_worker_launch(false);
                warn!(timeout_secs = self.launch_timeout.as_secs(), "Worker launch timed out");
                Err(ControllerError::LaunchTimeout(self.launch_timeout.as_secs()))
            }
        }
    }

    /// Workers currently alive.
    pub fn live_workers(&self) -> usize {
        self.live.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live workers seen.
    pub fn peak_workers(&self) -> usize {
        self.live.peak.load(Ordering::SeqCst)
    }
}

/// A launched worker. Terminating is idempotent; dropping without
/// terminating still tears the worker down.
pub struct ManagedWorker {
    // Dropped before the guard so the count only falls once the worker is gone
    handle: Option<Box<dyn WorkerHandle>>,
    guard: Option<LiveGuard>,
}

impl ManagedWorker {
    fn handle(&mut self) -> ControllerResult<&mut Box<dyn WorkerHandle>> {
        self.handle
            .as_mut()
            .ok_or_else(|| ControllerError::WorkerGone("worker was terminated".to_string()))
    }

    pub async fn query(&mut self) -> ControllerResult<WorkerStatus> {
        metrics::record_worker_poll();
        self.handle()?.query().await
    }

    pub async fn fetch_artifact(&mut self) -> ControllerResult<RawArtifact> {
        self.handle()?.fetch_artifact().await
    }

    pub fn is_terminated(&self) -> bool {
        self.handle.is_none()
    }

    pub async fn terminate(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.terminate().await;
            debug!("Worker terminated");
        }
        self.guard.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use beatcast_models::{JobId, RenderParams};
    use tokio_test::assert_ok;

    struct StubHandle {
        terminated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WorkerHandle for StubHandle {
        async fn query(&mut self) -> ControllerResult<WorkerStatus> {
            Ok(WorkerStatus::default())
        }

        async fn fetch_artifact(&mut self) -> ControllerResult<RawArtifact> {
            Err(ControllerError::artifact("none"))
        }

        async fn terminate(&mut self) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct StubLauncher {
        hang: bool,
        fail: AtomicBool,
        terminated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WorkerLauncher for StubLauncher {
        async fn launch(&self, _url: &LaunchUrl) -> ControllerResult<Box<dyn WorkerHandle>> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ControllerError::launch_failed("no such binary"));
            }
            Ok(Box::new(StubHandle {
                terminated: self.terminated.clone(),
            }))
        }
    }

    fn launcher(hang: bool, fail: bool) -> (Arc<StubLauncher>, Arc<AtomicUsize>) {
        let terminated = Arc::new(AtomicUsize::new(0));
        let launcher = Arc::new(StubLauncher {
            hang,
            fail: AtomicBool::new(fail),
            terminated: terminated.clone(),
        });
        (launcher, terminated)
    }

    fn url() -> LaunchUrl {
        LaunchUrl::encode(&JobId::new(), &RenderParams::new("/music/a.wav"))
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let (launcher, terminated) = launcher(false, false);
        let manager = WorkerManager::new(launcher, Duration::from_secs(5));

        let mut worker = assert_ok!(manager.launch(&url()).await);
        assert_eq!(manager.live_workers(), 1);

        worker.terminate().await;
        worker.terminate().await;
        assert_eq!(terminated.load(Ordering::SeqCst), 1);
        assert_eq!(manager.live_workers(), 0);
        assert!(worker.is_terminated());
        assert!(matches!(worker.query().await, Err(ControllerError::WorkerGone(_))));
    }

    #[tokio::test]
    async fn test_drop_releases_live_count() {
        let (launcher, _) = launcher(false, false);
        let manager = WorkerManager::new(launcher, Duration::from_secs(5));

        let worker = assert_ok!(manager.launch(&url()).await);
        drop(worker);
        assert_eq!(manager.live_workers(), 0);
        assert_eq!(manager.peak_workers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_timeout() {
        let (launcher, _) = launcher(true, false);
        let manager = WorkerManager::new(launcher, Duration::from_secs(30));

        let err = manager.launch(&url()).await.err().unwrap();
        assert!(matches!(err, ControllerError::LaunchTimeout(30)));
        assert_eq!(manager.live_workers(), 0);
    }

    #[tokio::test]
    async fn test_launch_failure_propagates() {
        let (launcher, _) = launcher(false, true);
        let manager = WorkerManager::new(launcher, Duration::from_secs(5));

        let err = manager.launch(&url()).await.err().unwrap();
        assert!(matches!(err, ControllerError::LaunchFailed(_)));
        assert_eq!(manager.live_workers(), 0);
    }
}
