//! Plan Execution
//!
//! Runs a resolved execution plan:
//!
//! - [`engine`]: Orchestration, worker threads, failure propagation
//! - [`scheduler`]: Readiness, job/core budgets, instance status
//! - [`step`]: Running one instance and collecting its outputs

pub mod engine;
pub mod scheduler;
pub mod step;

pub use engine::Engine;
pub use scheduler::{InstanceMetrics, InstanceStatus, Scheduler};
