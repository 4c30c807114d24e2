//! Persisted artifact listing and download.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::debug;

use beatcast_models::{ArtifactInfo, Container};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Artifact list response.
#[derive(Serialize)]
pub struct ExportsResponse {
    pub exports: Vec<ArtifactInfo>,
}

/// List persisted artifacts, newest first.
pub async fn list_exports(State(state): State<AppState>) -> ApiResult<Json<ExportsResponse>> {
    let exports = state.controller.store().list().await?;
    Ok(Json(ExportsResponse { exports }))
}

/// Download one persisted artifact.
pub async fn download_export(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let path = state.controller.store().path_for(&name).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::internal(format!("failed to read {}: {}", name, e)))?;
    debug!(name = %name, size = bytes.len(), "Serving export");

    let disposition = format!("attachment; filename=\"{}\"", name);
    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&name).to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(bytes),
    )
        .into_response())
}

fn content_type_for(name: &str) -> &'static str {
    let extension = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match Container::from_extension(extension) {
        Some(Container::Mp4) => "video/mp4",
        Some(Container::Webm) => "video/webm",
        Some(Container::Mkv) => "video/x-matroska",
        Some(Container::Mov) => "video/quicktime",
        None => "application/octet-stream",
    }
}
