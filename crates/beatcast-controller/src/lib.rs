//! Render job orchestration.
//!
//! - [`JobController`]: accepts render requests, keeps at most one job
//!   running and streams its progress
//! - [`WorkerManager`]: launches and tears down rendering workers, either as
//!   child processes ([`ProcessLauncher`]) or tasks ([`InProcessLauncher`])
//! - [`LogHub`]: bounded operational log history with live fan-out

pub mod config;
pub mod controller;
pub mod error;
pub mod inprocess;
pub mod logging;
pub mod logs;
pub mod manager;
pub mod metrics;
pub mod process;

pub use config::ControllerConfig;
pub use controller::{JobController, JobEvents};
pub use error::{ControllerError, ControllerResult};
pub use inprocess::{InProcessLauncher, PartsFactory};
pub use logging::JobLogger;
pub use logs::{LogHub, LogHubLayer, LogSubscription};
pub use manager::{ManagedWorker, WorkerHandle, WorkerLauncher, WorkerManager};
pub use process::ProcessLauncher;
