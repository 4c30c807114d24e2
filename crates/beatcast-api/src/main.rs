//! Axum API server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use beatcast_api::shutdown::{drain_jobs_on, shutdown_signal};
use beatcast_api::{create_router, metrics, ApiConfig, AppState};
use beatcast_controller::{ControllerConfig, JobController, LogHub};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let controller_config = ControllerConfig::from_env();
    let logs = LogHub::new(controller_config.log_history_capacity);

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("beatcast=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(logs.layer())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(logs.layer())
            .with(env_filter)
            .init();
    }

    info!("Starting beatcast-api");

    // Load configuration
    let config = ApiConfig::from_env();
    info!("API config: host={}, port={}", config.host, config.port);
    info!(
        worker = %controller_config.worker_binary.display(),
        exports = %controller_config.export_dir.display(),
        "Controller config loaded"
    );

    let controller = Arc::new(JobController::from_config(controller_config));
    let state = AppState::new(config.clone(), Arc::clone(&controller), logs);

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics()?)
    } else {
        None
    };

    let app = create_router(state, metrics_handle);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid bind address")?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(drain_jobs_on(shutdown_signal(), Arc::clone(&controller)))
        .await?;

    // No-op unless a job was submitted while connections drained
    controller.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}
