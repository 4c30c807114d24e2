//! Graceful shutdown.
//!
//! Streaming render responses only end once their job ends, so the active
//! job is cancelled as soon as the signal arrives. Axum then waits for the
//! connections to drain instead of waiting on the job.

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use beatcast_controller::JobController;

/// Resolves on CTRL+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for CTRL+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}

/// Wait for `signal`, then cancel the active job and wait for its worker.
///
/// Meant for `with_graceful_shutdown`: the future resolves only after the
/// active job has sent its terminal event.
pub async fn drain_jobs_on<F>(signal: F, controller: Arc<JobController>)
where
    F: Future<Output = ()>,
{
    signal.await;
    info!("Draining active render job");
    controller.shutdown().await;
}
