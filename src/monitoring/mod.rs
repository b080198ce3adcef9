//! Run Monitoring
//!
//! Tracks resource usage and instance timing during a pipeline run.
//!
//! # Components
//!
//! - [`ResourceMonitor`]: CPU and memory usage tracking
//! - [`ExecutionTimeline`]: Instance start/end timing for Gantt charts

pub mod resource;
pub mod timeline;

pub use resource::{ResourceMonitor, ResourceSample};
pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
