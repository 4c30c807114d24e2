//! Axum HTTP/WebSocket front end of the render orchestrator.
//!
//! This crate provides:
//! - Render submission over WebSocket and streamed HTTP
//! - Export listing and download
//! - Live operational log fan-out
//! - Prometheus metrics
//! - Graceful shutdown that drains the active job

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
