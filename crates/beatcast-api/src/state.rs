//! Application state.

use std::sync::Arc;

use beatcast_controller::{JobController, LogHub};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub controller: Arc<JobController>,
    pub logs: LogHub,
}

impl AppState {
    pub fn new(config: ApiConfig, controller: Arc<JobController>, logs: LogHub) -> Self {
        Self {
            config,
            controller,
            logs,
        }
    }
}
