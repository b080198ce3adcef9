//! Instance Scheduling
//!
//! Tracks the status of every plan instance during a run and decides
//! which instances may start next:
//! - Dependency tracking over plan indices
//! - Parallel job and CPU core budgeting
//! - Failure propagation to downstream instances
//! - Per-instance execution metrics

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};

use crate::workflow::plan::ExecutionPlan;
use crate::workflow::state::RunState;

/// Status of a plan instance during execution.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceStatus {
    /// Waiting for dependencies.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Failed with an error message.
    Failed(String),
    /// Never started: the named upstream instance failed.
    UpstreamSkipped(String),
    /// Completed in a previous run and carried over on resume.
    Resumed,
}

/// Execution metrics for a single instance.
#[derive(Debug, Clone)]
pub struct InstanceMetrics {
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    pub duration_ms: Option<u128>,
    pub status: InstanceStatus,
}

impl InstanceMetrics {
    fn new() -> Self {
        Self {
            start_time: None,
            end_time: None,
            duration_ms: None,
            status: InstanceStatus::Pending,
        }
    }
}

/// Schedules instances of a resolved plan.
pub struct Scheduler {
    plan: Arc<ExecutionPlan>,
    /// Direct dependents per instance, for failure propagation.
    dependents: Vec<Vec<usize>>,
    completed: HashSet<usize>,
    running: HashSet<usize>,
    failed: HashSet<usize>,
    skipped: HashSet<usize>,
    max_parallel: usize,
    metrics: HashMap<usize, InstanceMetrics>,
    cores_used: usize,
    max_cores: usize,
}

impl Scheduler {
    pub fn new(plan: Arc<ExecutionPlan>, max_parallel: usize) -> Self {
        let max_cores = num_cpus::get();

        info!(
            "creating scheduler: {} instances, {} max jobs, {} cores",
            plan.len(),
            max_parallel,
            max_cores
        );

        let mut metrics = HashMap::new();
        for idx in 0..plan.len() {
            metrics.insert(idx, InstanceMetrics::new());
        }

        let dependents = plan.dependents();
        Self {
            plan,
            dependents,
            completed: HashSet::new(),
            running: HashSet::new(),
            failed: HashSet::new(),
            skipped: HashSet::new(),
            max_parallel,
            metrics,
            cores_used: 0,
            max_cores,
        }
    }

    /// Creates a scheduler that carries over completions from a
    /// previous run.
    pub fn from_state(plan: Arc<ExecutionPlan>, state: &RunState, max_parallel: usize) -> Self {
        let mut scheduler = Self::new(plan, max_parallel);

        for (idx, instance) in scheduler.plan.instances.iter().enumerate() {
            if state.is_completed(&instance.id.to_string()) {
                scheduler.completed.insert(idx);
                if let Some(metrics) = scheduler.metrics.get_mut(&idx) {
                    metrics.status = InstanceStatus::Resumed;
                }
                info!("skipping previously completed instance: {}", instance.id);
            }
        }

        scheduler
    }

    /// Instances ready to start now.
    ///
    /// An instance is ready when it is pending, every dependency has
    /// completed, and starting it stays within the job and core budget.
    /// A tool asking for more cores than the machine has gets the whole
    /// machine to itself.
    pub fn ready_instances(&self) -> Vec<usize> {
        let mut ready = Vec::new();
        let mut cores_to_allocate = 0;

        for (idx, instance) in self.plan.instances.iter().enumerate() {
            if self.is_settled(idx) || self.running.contains(&idx) {
                continue;
            }

            if !instance.deps.iter().all(|dep| self.completed.contains(dep)) {
                continue;
            }

            if self.running.len() + ready.len() >= self.max_parallel {
                break;
            }

            let cores = instance.tool.cores.min(self.max_cores);
            if self.cores_used + cores_to_allocate + cores > self.max_cores {
                debug!(
                    "instance '{}' needs {} cores but only {} free",
                    instance.id,
                    cores,
                    self.max_cores - self.cores_used - cores_to_allocate
                );
                continue;
            }

            ready.push(idx);
            cores_to_allocate += cores;
        }

        ready
    }

    pub fn mark_running(&mut self, idx: usize) {
        self.running.insert(idx);
        self.cores_used += self.instance_cores(idx);

        debug!(
            "instance '{}' started ({}/{} cores in use)",
            self.plan.instances[idx].id, self.cores_used, self.max_cores
        );

        if let Some(metrics) = self.metrics.get_mut(&idx) {
            metrics.start_time = Some(Instant::now());
            metrics.status = InstanceStatus::Running;
        }
    }

    pub fn mark_completed(&mut self, idx: usize) {
        self.running.remove(&idx);
        self.completed.insert(idx);
        self.cores_used = self.cores_used.saturating_sub(self.instance_cores(idx));
        self.finish_metrics(idx, InstanceStatus::Completed);
    }

    pub fn mark_failed(&mut self, idx: usize, error: String) {
        self.running.remove(&idx);
        self.failed.insert(idx);
        self.cores_used = self.cores_used.saturating_sub(self.instance_cores(idx));
        self.finish_metrics(idx, InstanceStatus::Failed(error));
    }

    /// Marks everything downstream of a failed instance as skipped.
    /// Instances on independent branches are untouched and keep
    /// running. Returns the indices newly skipped.
    pub fn skip_downstream(&mut self, failed_idx: usize) -> Vec<usize> {
        let failed_name = self.plan.instances[failed_idx].id.to_string();
        let mut newly_skipped = Vec::new();

        let mut queue: VecDeque<usize> = self.dependents[failed_idx].iter().copied().collect();
        while let Some(idx) = queue.pop_front() {
            if self.is_settled(idx) || self.running.contains(&idx) {
                continue;
            }

            self.skipped.insert(idx);
            if let Some(metrics) = self.metrics.get_mut(&idx) {
                metrics.status = InstanceStatus::UpstreamSkipped(failed_name.clone());
            }
            newly_skipped.push(idx);
            queue.extend(self.dependents[idx].iter().copied());
        }

        info!(
            "instance '{}' failed: {} downstream instances will not run",
            failed_name,
            newly_skipped.len()
        );
        newly_skipped
    }

    /// Returns true while some instance can still run or finish.
    pub fn has_work_remaining(&self) -> bool {
        self.completed.len() + self.failed.len() + self.skipped.len() < self.plan.len()
    }

    /// Current progress as (settled, total).
    pub fn progress(&self) -> (usize, usize) {
        (
            self.completed.len() + self.failed.len() + self.skipped.len(),
            self.plan.len(),
        )
    }

    pub fn failures(&self) -> Vec<(usize, String)> {
        let mut failures: Vec<(usize, String)> = self
            .metrics
            .iter()
            .filter_map(|(idx, m)| match &m.status {
                InstanceStatus::Failed(error) => Some((*idx, error.clone())),
                _ => None,
            })
            .collect();
        failures.sort_by_key(|(idx, _)| *idx);
        failures
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn metrics(&self) -> &HashMap<usize, InstanceMetrics> {
        &self.metrics
    }

    fn is_settled(&self, idx: usize) -> bool {
        self.completed.contains(&idx)
            || self.failed.contains(&idx)
            || self.skipped.contains(&idx)
    }

    fn instance_cores(&self, idx: usize) -> usize {
        self.plan.instances[idx].tool.cores.min(self.max_cores)
    }

    fn finish_metrics(&mut self, idx: usize, status: InstanceStatus) {
        if let Some(metrics) = self.metrics.get_mut(&idx) {
            metrics.end_time = Some(Instant::now());
            if let Some(start) = metrics.start_time {
                metrics.duration_ms = Some(start.elapsed().as_millis());
            }
            metrics.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{ToolOutput, ParamType, ToolSpec};
    use crate::workflow::plan::{InstanceId, StepInstance};
    use std::collections::{BTreeMap, BTreeSet};

    fn test_tool(cores: usize) -> Arc<ToolSpec> {
        Arc::new(ToolSpec {
            inputs: Vec::new(),
            command: "true".to_string(),
            outputs: vec![ToolOutput {
                name: "out".to_string(),
                ty: ParamType::File,
                path: "out.txt".to_string(),
                secondary: Vec::new(),
            }],
            cores,
            memory_mb: None,
        })
    }

    fn test_instance(path: &str, deps: &[usize], cores: usize) -> StepInstance {
        StepInstance {
            id: InstanceId::new(path, Vec::new()),
            tool: test_tool(cores),
            inputs: BTreeMap::new(),
            deps: deps.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    /// align -> call -> annotate, with an independent qc branch.
    fn diamond_plan() -> Arc<ExecutionPlan> {
        Arc::new(ExecutionPlan {
            instances: vec![
                test_instance("align", &[], 1),
                test_instance("call", &[0], 1),
                test_instance("annotate", &[1], 1),
                test_instance("qc", &[0], 1),
            ],
            outputs: BTreeMap::new(),
        })
    }

    /// Like [`Scheduler::new`] but with a fixed core budget, so
    /// concurrency assertions hold on single-core machines too.
    fn scheduler_with_cores(
        plan: Arc<ExecutionPlan>,
        max_parallel: usize,
        max_cores: usize,
    ) -> Scheduler {
        let mut scheduler = Scheduler::new(plan, max_parallel);
        scheduler.max_cores = max_cores;
        scheduler
    }

    #[test]
    fn test_only_roots_ready_initially() {
        let scheduler = Scheduler::new(diamond_plan(), 4);
        assert_eq!(scheduler.ready_instances(), vec![0]);
    }

    #[test]
    fn test_dependents_ready_after_completion() {
        let mut scheduler = scheduler_with_cores(diamond_plan(), 4, 4);

        scheduler.mark_running(0);
        scheduler.mark_completed(0);

        let ready = scheduler.ready_instances();
        assert!(ready.contains(&1));
        assert!(ready.contains(&3));
        assert!(!ready.contains(&2));
    }

    #[test]
    fn test_max_parallel_respected() {
        let plan = Arc::new(ExecutionPlan {
            instances: vec![
                test_instance("a", &[], 1),
                test_instance("b", &[], 1),
                test_instance("c", &[], 1),
            ],
            outputs: BTreeMap::new(),
        });

        let scheduler = scheduler_with_cores(plan, 2, 4);
        assert_eq!(scheduler.ready_instances().len(), 2);
    }

    #[test]
    fn test_failure_skips_downstream_but_not_siblings() {
        let mut scheduler = Scheduler::new(diamond_plan(), 4);

        scheduler.mark_running(0);
        scheduler.mark_completed(0);
        scheduler.mark_running(1);
        scheduler.mark_failed(1, "exit 1".to_string());

        let skipped = scheduler.skip_downstream(1);
        assert_eq!(skipped, vec![2]);

        // The qc branch is independent of the failure and still runs.
        assert!(scheduler.ready_instances().contains(&3));
        assert!(matches!(
            scheduler.metrics()[&2].status,
            InstanceStatus::UpstreamSkipped(_)
        ));
    }

    #[test]
    fn test_run_settles_after_failure() {
        let mut scheduler = Scheduler::new(diamond_plan(), 4);

        scheduler.mark_running(0);
        scheduler.mark_completed(0);
        scheduler.mark_running(1);
        scheduler.mark_failed(1, "exit 1".to_string());
        scheduler.skip_downstream(1);
        scheduler.mark_running(3);
        scheduler.mark_completed(3);

        assert!(!scheduler.has_work_remaining());
        assert_eq!(scheduler.progress(), (4, 4));
        assert_eq!(scheduler.failures().len(), 1);
        assert_eq!(scheduler.skipped_count(), 1);
    }

    #[test]
    fn test_transitive_skip() {
        let plan = Arc::new(ExecutionPlan {
            instances: vec![
                test_instance("a", &[], 1),
                test_instance("b", &[0], 1),
                test_instance("c", &[1], 1),
            ],
            outputs: BTreeMap::new(),
        });
        let mut scheduler = Scheduler::new(plan, 4);

        scheduler.mark_running(0);
        scheduler.mark_failed(0, "boom".to_string());
        let skipped = scheduler.skip_downstream(0);

        assert_eq!(skipped, vec![1, 2]);
        assert!(!scheduler.has_work_remaining());
    }

    #[test]
    fn test_core_budget_limits_concurrency() {
        let max_cores = num_cpus::get();
        let plan = Arc::new(ExecutionPlan {
            instances: vec![
                test_instance("wide_a", &[], max_cores),
                test_instance("wide_b", &[], max_cores),
            ],
            outputs: BTreeMap::new(),
        });

        let scheduler = Scheduler::new(plan, 4);
        // Only one machine-wide tool fits at a time.
        assert_eq!(scheduler.ready_instances(), vec![0]);
    }

    #[test]
    fn test_oversized_tool_still_schedulable() {
        let plan = Arc::new(ExecutionPlan {
            instances: vec![test_instance("huge", &[], num_cpus::get() * 4)],
            outputs: BTreeMap::new(),
        });

        let scheduler = Scheduler::new(plan, 4);
        assert_eq!(scheduler.ready_instances(), vec![0]);
    }

    #[test]
    fn test_resume_from_state() {
        let mut state = RunState::new("pipeline.yaml");
        state.mark_completed("align");

        let mut scheduler = Scheduler::from_state(diamond_plan(), &state, 4);
        scheduler.max_cores = 4;
        assert_eq!(scheduler.progress(), (1, 4));

        let ready = scheduler.ready_instances();
        assert!(ready.contains(&1));
        assert!(ready.contains(&3));
    }

    #[test]
    fn test_metrics_duration_recorded() {
        let mut scheduler = Scheduler::new(diamond_plan(), 4);

        scheduler.mark_running(0);
        std::thread::sleep(std::time::Duration::from_millis(10));
        scheduler.mark_completed(0);

        let metrics = &scheduler.metrics()[&0];
        assert!(metrics.duration_ms.is_some());
        assert!(metrics.duration_ms.unwrap() >= 10);
        assert_eq!(metrics.status, InstanceStatus::Completed);
    }
}
