//! Execution Timeline
//!
//! Tracks instance start/end times for generating execution
//! reports and Gantt charts.

use std::collections::HashMap;
use std::time::Instant;

/// Type of timeline event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    /// Instance started executing
    Started,
    /// Instance completed successfully
    Completed,
    /// Instance failed
    Failed,
    /// Instance never ran because an upstream instance failed
    Skipped,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// Id of the plan instance (e.g. `call_variants[2]`)
    pub instance_id: String,
    /// Type of event
    pub event_type: EventType,
    /// When the event occurred
    pub timestamp: Instant,
}

/// Tracks the execution timeline of a run.
///
/// Records when each instance starts, completes, fails or gets
/// skipped, enabling generation of Gantt charts and timing reports.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for an instance.
    pub fn add_event(&mut self, instance_id: String, event_type: EventType) {
        self.events.push(TimelineEvent {
            instance_id,
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each instance is shown as a bar indicating when it ran relative
    /// to the total execution time. Skipped instances are listed below
    /// the chart without a bar.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = Instant::now().duration_since(self.start_time).as_millis();

        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        let mut instance_times: HashMap<String, (u128, u128)> = HashMap::new();
        let mut skipped: Vec<&str> = Vec::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();

            match event.event_type {
                EventType::Started => {
                    instance_times
                        .entry(event.instance_id.clone())
                        .or_insert((elapsed, 0))
                        .0 = elapsed;
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(times) = instance_times.get_mut(&event.instance_id) {
                        times.1 = elapsed;
                    }
                }
                EventType::Skipped => {
                    skipped.push(&event.instance_id);
                }
            }
        }

        // Sort by start time
        let mut sorted: Vec<_> = instance_times.into_iter().collect();
        sorted.sort_by_key(|(_, (start, _))| *start);

        for (instance_id, (start, end)) in sorted {
            if end > start {
                let start_pos = (start as f64 * scale) as usize;
                let duration = ((end - start) as f64 * scale).max(1.0) as usize;

                let mut bar = " ".repeat(start_pos);
                bar.push_str(&"#".repeat(duration));

                let duration_ms = end - start;
                output.push_str(&format!(
                    "{:12} |{}| ({} ms)\n",
                    truncate(&instance_id, 12),
                    bar,
                    duration_ms
                ));
            }
        }

        for instance_id in skipped {
            output.push_str(&format!("{:12} (skipped)\n", truncate(instance_id, 12)));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns instance durations in milliseconds.
    pub fn get_durations(&self) -> HashMap<String, u128> {
        let mut starts: HashMap<String, u128> = HashMap::new();
        let mut durations: HashMap<String, u128> = HashMap::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();

            match event.event_type {
                EventType::Started => {
                    starts.insert(event.instance_id.clone(), elapsed);
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(start) = starts.get(&event.instance_id) {
                        durations.insert(event.instance_id.clone(), elapsed - start);
                    }
                }
                EventType::Skipped => {}
            }
        }

        durations
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncates a string to a maximum length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}
