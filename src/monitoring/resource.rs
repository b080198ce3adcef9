//! Resource Usage Monitoring
//!
//! Tracks CPU and memory usage of the runner process during a
//! pipeline run, for performance analysis and reporting.

use std::time::{Duration, Instant};

use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, System};

/// A single resource usage sample.
#[derive(Debug, Clone)]
pub struct ResourceSample {
    /// When this sample was taken
    pub timestamp: Instant,
    /// CPU usage percentage (0-100+)
    pub cpu_usage: f32,
    /// Memory usage in megabytes
    pub memory_mb: u64,
}

/// Monitors resource usage of the current process.
///
/// # Example
///
/// ```rust,ignore
/// use pipegraph::monitoring::ResourceMonitor;
/// use std::time::Duration;
/// use std::thread;
///
/// let mut monitor = ResourceMonitor::new();
///
/// for _ in 0..5 {
///     monitor.sample();
///     thread::sleep(Duration::from_millis(500));
/// }
///
/// println!("{}", monitor.get_summary());
/// ```
pub struct ResourceMonitor {
    system: System,
    process_id: Pid,
    samples: Vec<ResourceSample>,
    warmup_done: bool,
    last_sample: Option<Instant>,
    min_interval: Duration,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            process_id: get_current_pid().expect("Failed to get process ID"),
            samples: Vec::new(),
            warmup_done: false,
            last_sample: None,
            min_interval: Duration::from_millis(250),
        }
    }

    /// Sets the minimum interval between samples.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Takes a resource usage sample.
    ///
    /// The first call performs CPU warmup (sysinfo needs two readings
    /// for a meaningful CPU percentage). Subsequent calls are
    /// rate-limited by `min_interval`.
    pub fn sample(&mut self) {
        let pid = self.process_id;
        let now = Instant::now();

        let refresh_kind = ProcessRefreshKind::new().with_cpu().with_memory();

        if !self.warmup_done {
            self.system.refresh_processes_specifics(refresh_kind);
            self.warmup_done = true;
            self.last_sample = Some(now);
            return;
        }

        if let Some(last) = self.last_sample {
            if now.duration_since(last) < self.min_interval {
                return;
            }
        }

        self.system.refresh_processes_specifics(refresh_kind);
        self.last_sample = Some(now);

        if let Some(process) = self.system.process(pid) {
            self.samples.push(ResourceSample {
                timestamp: now,
                cpu_usage: process.cpu_usage(),
                memory_mb: process.memory() / (1024 * 1024),
            });
        }
    }

    /// Returns a human-readable summary of resource usage.
    pub fn get_summary(&self) -> String {
        if self.samples.is_empty() {
            return "No resource data collected".to_string();
        }

        let avg_cpu: f32 =
            self.samples.iter().map(|s| s.cpu_usage).sum::<f32>() / self.samples.len() as f32;
        let max_memory = self.samples.iter().map(|s| s.memory_mb).max().unwrap_or(0);
        let min_memory = self.samples.iter().map(|s| s.memory_mb).min().unwrap_or(0);

        format!(
            "Resource Usage:\n  Average CPU: {:.1}%\n  Peak Memory: {} MB\n  Min Memory: {} MB\n  Samples: {}",
            avg_cpu, max_memory, min_memory, self.samples.len()
        )
    }

    /// Returns all collected samples.
    pub fn get_samples(&self) -> &[ResourceSample] {
        &self.samples
    }

    /// Returns the peak memory usage in MB.
    pub fn peak_memory_mb(&self) -> u64 {
        self.samples.iter().map(|s| s.memory_mb).max().unwrap_or(0)
    }

    /// Returns the average CPU usage.
    pub fn average_cpu(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_usage).sum::<f32>() / self.samples.len() as f32
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
