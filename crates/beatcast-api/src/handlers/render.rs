//! Streaming render endpoint.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use tracing::{info, warn};
use validator::Validate;

use beatcast_models::{ProgressEvent, RenderParams};

use crate::error::ApiResult;
use crate::state::AppState;

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Submit a render job and stream its progress as newline-delimited JSON.
///
/// Submitting supersedes any job already in flight. The body ends after the
/// terminal `done` or `error` line.
pub async fn submit_render(
    State(state): State<AppState>,
    Json(params): Json<RenderParams>,
) -> ApiResult<Response> {
    params.validate()?;

    let events = state.controller.submit(params).await;
    info!(job_id = %events.job_id(), "Render job accepted over HTTP");

    let body = events
        .into_stream()
        .filter_map(|event| async move { encode_line(&event) })
        .map(Ok::<_, Infallible>);

    Ok((
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(body),
    )
        .into_response())
}

fn encode_line(event: &ProgressEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(mut line) => {
            line.push('\n');
            Some(line)
        }
        Err(e) => {
            warn!("Failed to encode progress event: {}", e);
            None
        }
    }
}
