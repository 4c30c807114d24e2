//! Rendering worker binary.
//!
//! Usage: `beatcast-worker <launch-url>`. Stdout carries the control channel,
//! so all logging goes to stderr.

use anyhow::Context;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use beatcast_models::LaunchUrl;
use beatcast_worker::{
    ipc, ClockSource, FfmpegCapture, ProtocolConfig, ProtocolParts, RenderProtocol, StatusBoard,
    TitleCardRenderer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("beatcast=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .with_target(true),
            )
            .with(env_filter)
            .init();
    }

    let raw_url = std::env::args()
        .nth(1)
        .context("missing launch URL argument")?;
    let launch = LaunchUrl::parse(&raw_url).context("invalid launch URL")?;
    let job_id = launch.job_id().map(|id| id.to_string()).unwrap_or_else(|| "adhoc".to_string());
    let params = launch.params();

    let config = ProtocolConfig::from_env();
    let work_dir = config.work_dir.join(&job_id);
    info!(job_id = %job_id, source = %params.source, "Starting beatcast-worker");

    let board = StatusBoard::new();
    let parts = ProtocolParts {
        scene: Box::new(TitleCardRenderer::new()),
        capture: Box::new(FfmpegCapture::negotiated(work_dir.join("capture")).await),
        source: Box::new(ClockSource::new()),
    };
    let protocol = Arc::new(RenderProtocol::new(config, board.clone(), parts));

    let runner = protocol.clone();
    let render = tokio::spawn(async move {
        if let Err(e) = runner.run(&params).await {
            error!("Render failed: {}", e);
        }
    });

    let served = ipc::serve(
        board,
        work_dir.clone(),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await;

    // Controller is gone or asked us to stop; nothing may outlive this process
    render.abort();
    let _ = render.await;
    let _ = tokio::fs::remove_dir_all(work_dir.join("capture")).await;

    served.context("control channel failed")?;
    info!(job_id = %job_id, "Worker exiting");
    Ok(())
}
