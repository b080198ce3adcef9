//! Plan Execution Engine
//!
//! Drives a resolved execution plan to completion:
//! - Parallel instance scheduling over worker threads
//! - Deferred expression evaluation once upstream values exist
//! - Failure propagation: downstream instances of a failed instance
//!   never start, independent branches keep running, and partial
//!   results stay on disk
//! - Resource monitoring and an execution timeline
//! - Pause/resume via file-based signaling
//! - State persistence for crash recovery

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::monitoring::{EventType, ExecutionTimeline, ResourceMonitor};
use crate::workflow::errors::ExecutionError;
use crate::workflow::expr;
use crate::workflow::model::{FileValue, ParamType, ParamValue, ToolSpec};
use crate::workflow::plan::{ExecutionPlan, Slot, StepInstance};
use crate::workflow::state::RunState;

use super::scheduler::Scheduler;
use super::step;

/// Interval for checking the pause flag file.
const PAUSE_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Interval for resource monitoring samples.
const MONITOR_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

type InstanceResult = Result<BTreeMap<String, ParamValue>, ExecutionError>;

/// Executes a resolved plan.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
/// use pipegraph::execution::Engine;
/// use pipegraph::workflow::{load_graph, load_inputs, resolve};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let graph = load_graph(Path::new("pipeline.yaml"))?;
///     let values = load_inputs(Path::new("inputs.yaml"), &graph)?;
///     let plan = resolve(&graph, &values)?;
///
///     let mut engine = Engine::new(plan);
///     engine.set_max_parallel(4);
///     engine.set_working_dir("/data/analysis");
///
///     let outputs = engine.run()?;
///     println!("{} workflow outputs", outputs.len());
///     Ok(())
/// }
/// ```
pub struct Engine {
    plan: Arc<ExecutionPlan>,
    pipeline_path: String,
    max_parallel: usize,
    dry_run: bool,
    pause_flag_path: Option<String>,
    working_dir: PathBuf,
}

impl Engine {
    pub fn new(plan: ExecutionPlan) -> Self {
        Self {
            plan: Arc::new(plan),
            pipeline_path: String::new(),
            max_parallel: 4,
            dry_run: false,
            pause_flag_path: None,
            working_dir: PathBuf::from("."),
        }
    }

    /// Sets the pipeline file path (used for state persistence).
    pub fn set_pipeline_path(&mut self, path: impl Into<String>) {
        self.pipeline_path = path.into();
    }

    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = max;
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Sets the path for pause/resume signaling.
    pub fn set_pause_flag_path(&mut self, path: impl Into<String>) {
        self.pause_flag_path = Some(path.into());
    }

    /// Sets the directory instance work dirs are created under.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = dir.into();
    }

    /// Executes the plan.
    ///
    /// Runs instances in dependency order, as many in parallel as the
    /// job and core budget allows. A failing instance stops its own
    /// downstream cone; everything else continues. When any instance
    /// failed the run itself fails after settling, with completed work
    /// recorded in the state file for resume.
    ///
    /// On success returns the workflow-level outputs.
    pub fn run(&mut self) -> Result<BTreeMap<String, ParamValue>, Box<dyn std::error::Error>> {
        let start_time = Instant::now();

        if self.pipeline_path.is_empty() {
            self.pipeline_path = "pipeline.yaml".to_string();
        }

        let mut state = RunState::load(&self.pipeline_path).unwrap_or_else(|_| {
            info!("starting fresh run");
            RunState::new(&self.pipeline_path)
        });

        // Recover outputs of previously completed instances; anything
        // whose files are gone gets rerun.
        let mut completed_outputs: HashMap<usize, BTreeMap<String, ParamValue>> = HashMap::new();
        if state.is_resume() && !self.dry_run {
            self.recover_completed(&mut state, &mut completed_outputs);
        }

        let mut scheduler = if state.is_resume() && !self.dry_run {
            Scheduler::from_state(Arc::clone(&self.plan), &state, self.max_parallel)
        } else {
            Scheduler::new(Arc::clone(&self.plan), self.max_parallel)
        };

        let mut timeline = ExecutionTimeline::new();

        info!(
            "starting execution: {} instances (max parallel: {}, dry run: {})",
            self.plan.len(),
            self.max_parallel,
            self.dry_run
        );

        let (tx, rx): (Sender<(usize, InstanceResult)>, Receiver<(usize, InstanceResult)>) =
            channel();

        let monitor_running = Arc::new(AtomicBool::new(true));
        let monitor_flag = Arc::clone(&monitor_running);

        let monitor_handle = thread::spawn(move || {
            let mut monitor = ResourceMonitor::new();
            while monitor_flag.load(Ordering::Relaxed) {
                monitor.sample();
                thread::sleep(MONITOR_SAMPLE_INTERVAL);
            }
            monitor
        });

        let mut running_count = 0;
        let mut upstream_failures: Vec<ExecutionError> = Vec::new();

        loop {
            loop {
                let ready = scheduler.ready_instances();
                if ready.is_empty() {
                    break;
                }

                for idx in ready {
                    if let Some(ref pause_path) = self.pause_flag_path {
                        self.check_pause_flag(pause_path);
                    }

                    let instance = &self.plan.instances[idx];
                    info!("starting instance: {}", instance.id);
                    timeline.add_event(instance.id.to_string(), EventType::Started);
                    scheduler.mark_running(idx);

                    if self.dry_run {
                        println!();
                        println!("[DRY RUN] Instance: {}", instance.id);
                        println!("  Command: {}", instance.tool.command);
                        println!("  Cores: {}", instance.tool.cores);
                        println!("  Work dir: {}", instance.id.work_dir());

                        timeline.add_event(instance.id.to_string(), EventType::Completed);
                        scheduler.mark_completed(idx);
                        continue;
                    }

                    // Bind concrete values; deferred expressions are
                    // evaluated here, now that upstream values exist.
                    let inputs = match materialize_inputs(instance, &completed_outputs) {
                        Ok(inputs) => inputs,
                        Err(e) => {
                            error!("{}", e);
                            timeline.add_event(instance.id.to_string(), EventType::Failed);
                            scheduler.mark_failed(idx, e.to_string());
                            state.mark_failed(&instance.id.to_string());
                            state.save()?;
                            self.propagate_failure(
                                idx,
                                &mut scheduler,
                                &mut timeline,
                                &mut upstream_failures,
                            );
                            continue;
                        }
                    };

                    let tx = tx.clone();
                    let plan = Arc::clone(&self.plan);
                    let working_dir = self.working_dir.clone();

                    thread::spawn(move || {
                        let instance = &plan.instances[idx];
                        let result = step::execute_instance(instance, &inputs, &working_dir);
                        if let Err(e) = tx.send((idx, result)) {
                            error!("failed to send completion signal: {}", e);
                        }
                    });

                    running_count += 1;
                }
            }

            if running_count == 0 {
                if !scheduler.has_work_remaining() {
                    break;
                }
                // Nothing running and nothing ready: the rest of the
                // plan is unreachable (should not happen for a valid
                // plan with failure propagation applied).
                warn!("no runnable instances but work remains; stopping");
                break;
            }

            let (idx, result) = rx
                .recv()
                .map_err(|e| format!("failed to receive instance completion: {}", e))?;
            running_count -= 1;

            let instance_name = self.plan.instances[idx].id.to_string();
            match result {
                Ok(outputs) => {
                    info!("instance '{}' completed", instance_name);
                    completed_outputs.insert(idx, outputs);
                    scheduler.mark_completed(idx);
                    timeline.add_event(instance_name.clone(), EventType::Completed);
                    state.mark_completed(&instance_name);
                    state.save()?;
                }
                Err(e) => {
                    error!("{}", e);
                    scheduler.mark_failed(idx, e.to_string());
                    timeline.add_event(instance_name.clone(), EventType::Failed);
                    state.mark_failed(&instance_name);
                    state.save()?;
                    self.propagate_failure(
                        idx,
                        &mut scheduler,
                        &mut timeline,
                        &mut upstream_failures,
                    );
                }
            }
        }

        monitor_running.store(false, Ordering::Relaxed);
        let final_monitor = monitor_handle
            .join()
            .map_err(|_| "monitor thread panicked")?;

        let total_time = start_time.elapsed();
        let failures = scheduler.failures();

        println!("{}", timeline.gantt_chart());

        if !failures.is_empty() {
            println!();
            println!(
                "Run failed: {} instance(s) failed, {} skipped, {} completed",
                failures.len(),
                scheduler.skipped_count(),
                scheduler.progress().0 - failures.len() - scheduler.skipped_count()
            );
            for err in &upstream_failures {
                warn!("{}", err);
            }

            let (first_idx, first_error) = &failures[0];
            return Err(format!(
                "instance '{}' failed: {}",
                self.plan.instances[*first_idx].id, first_error
            )
            .into());
        }

        println!();
        println!("Run completed successfully");
        println!("Total execution time: {:.2?}", total_time);
        println!();
        println!("{}", final_monitor.get_summary());

        if self.dry_run {
            return Ok(BTreeMap::new());
        }

        // Workflow-level outputs, with gathers assembled in plan order.
        let mut outputs = BTreeMap::new();
        for (name, slot) in &self.plan.outputs {
            let value = slot
                .materialize(&completed_outputs)
                .map_err(|detail| format!("workflow output '{}': {}", name, detail))?;
            outputs.insert(name.clone(), value);
        }
        Ok(outputs)
    }

    /// Marks the downstream cone of a failed instance as skipped and
    /// records one upstream-failure error per skipped instance.
    fn propagate_failure(
        &self,
        failed_idx: usize,
        scheduler: &mut Scheduler,
        timeline: &mut ExecutionTimeline,
        upstream_failures: &mut Vec<ExecutionError>,
    ) {
        let failed_name = self.plan.instances[failed_idx].id.to_string();
        for idx in scheduler.skip_downstream(failed_idx) {
            let skipped_name = self.plan.instances[idx].id.to_string();
            timeline.add_event(skipped_name.clone(), EventType::Skipped);
            upstream_failures.push(ExecutionError::UpstreamFailure {
                instance: skipped_name,
                failed: failed_name.clone(),
            });
        }
    }

    /// Re-derives the outputs of instances completed in a previous run.
    /// Instances whose output files no longer exist (or whose upstream
    /// completions were dropped) are removed from the state and rerun.
    fn recover_completed(
        &self,
        state: &mut RunState,
        completed_outputs: &mut HashMap<usize, BTreeMap<String, ParamValue>>,
    ) {
        for (idx, instance) in self.plan.instances.iter().enumerate() {
            let name = instance.id.to_string();
            if !state.is_completed(&name) {
                continue;
            }

            if !instance
                .deps
                .iter()
                .all(|dep| completed_outputs.contains_key(dep))
            {
                info!("instance '{}' upstream not recovered, rerunning", name);
                state.completed.remove(&name);
                continue;
            }

            let work_dir = self.working_dir.join(instance.id.work_dir());
            let recovered = materialize_inputs(instance, completed_outputs)
                .and_then(|inputs| step::collect_outputs(instance, &inputs, &work_dir));

            match recovered {
                Ok(outputs) => {
                    completed_outputs.insert(idx, outputs);
                }
                Err(_) => {
                    info!("instance '{}' outputs missing, rerunning", name);
                    state.completed.remove(&name);
                }
            }
        }
    }

    /// Blocks while the pause flag file exists.
    fn check_pause_flag(&self, pause_flag_path: &str) {
        let pause_path = Path::new(pause_flag_path);

        if pause_path.exists() {
            info!("execution paused, waiting for resume signal");

            while pause_path.exists() {
                thread::sleep(PAUSE_CHECK_INTERVAL);
            }

            info!("resumed");
        }
    }
}

/// Turns an instance's slots into concrete values. Deferred expressions
/// are evaluated last, against the already-materialized siblings.
fn materialize_inputs(
    instance: &StepInstance,
    completed: &HashMap<usize, BTreeMap<String, ParamValue>>,
) -> Result<BTreeMap<String, ParamValue>, ExecutionError> {
    let instance_name = instance.id.to_string();

    let mut values = BTreeMap::new();
    let mut deferred = Vec::new();
    for (name, slot) in &instance.inputs {
        match slot {
            Slot::Expr(text) => deferred.push((name.clone(), text.clone())),
            other => {
                let mut value =
                    other
                        .materialize(completed)
                        .map_err(|detail| ExecutionError::StepExecution {
                            instance: instance_name.clone(),
                            detail,
                        })?;
                // Consumer-side secondary rules apply to upstream files
                // too, not just to values bound at resolve time.
                if let Some(decl) = instance.tool.input(name) {
                    value.attach_secondary(&decl.secondary);
                }
                values.insert(name.clone(), value);
            }
        }
    }

    for (name, text) in deferred {
        let mut scope = expr::Scope::new();
        scope.insert("inputs".to_string(), ParamValue::Record(values.clone()));

        let value = expr::evaluate_template(&text, &scope).map_err(|e| {
            ExecutionError::StepExecution {
                instance: instance_name.clone(),
                detail: format!("input '{}': {}", name, e),
            }
        })?;
        let value = coerce_deferred(&instance.tool, &name, value);
        values.insert(name, value);
    }

    Ok(values)
}

/// A deferred expression feeding a File-typed input yields a path
/// string; promote it to a file handle with the declared secondaries.
fn coerce_deferred(tool: &ToolSpec, name: &str, value: ParamValue) -> ParamValue {
    let Some(decl) = tool.input(name) else {
        return value;
    };
    let mut value = match (&decl.ty, value) {
        (ParamType::File, ParamValue::Str(path)) => ParamValue::File(FileValue::new(path)),
        (_, value) => value,
    };
    value.attach_secondary(&decl.secondary);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{GraphOutput, GraphSpec, ParamDecl, RunTarget, StepSpec};
    use crate::workflow::resolver::resolve;
    use serde_yaml::Value as YamlValue;
    use tempfile::tempdir;

    fn engine_for(plan: ExecutionPlan, dir: &Path) -> Engine {
        let mut engine = Engine::new(plan);
        engine.set_working_dir(dir.to_path_buf());
        // Unique state stem per test dir so runs never share state.
        let stem = dir.file_name().and_then(|s| s.to_str()).unwrap();
        engine.set_pipeline_path(
            dir.join(format!("{}.yaml", stem)).to_string_lossy().to_string(),
        );
        engine
    }

    fn echo_tool(output_name: &str, inputs: Vec<ParamDecl>, command: &str) -> RunTarget {
        let tool: crate::workflow::model::ToolSpec = serde_yaml::from_str(&format!(
            r#"
command: "{}"
outputs:
  - name: {}
    type: File
    path: "{}.txt"
"#,
            command, output_name, output_name
        ))
        .unwrap();
        let mut tool = tool;
        tool.inputs = inputs;
        RunTarget::Tool(Box::new(tool))
    }

    #[test]
    fn test_scatter_run_gathers_in_order() {
        let dir = tempdir().unwrap();

        let graph = GraphSpec {
            inputs: vec![ParamDecl::new(
                "samples",
                ParamType::Array(Box::new(ParamType::Str)),
            )],
            steps: vec![StepSpec::new(
                "emit",
                echo_tool(
                    "out",
                    vec![ParamDecl::new("sample", ParamType::Str)],
                    "echo $(inputs.sample) > out.txt",
                ),
            )
            .bind("sample", "samples")
            .scatter_over("sample")],
            outputs: vec![GraphOutput {
                name: "all".to_string(),
                from: "emit/out".to_string(),
            }],
        };

        let mut values = BTreeMap::new();
        values.insert(
            "samples".to_string(),
            ParamValue::Array(vec![
                ParamValue::Str("alpha".to_string()),
                ParamValue::Str("beta".to_string()),
                ParamValue::Str("gamma".to_string()),
            ]),
        );

        let plan = resolve(&graph, &values).unwrap();
        let mut engine = engine_for(plan, dir.path());
        let outputs = engine.run().unwrap();

        // Gather order follows scatter index, not completion order.
        match &outputs["all"] {
            ParamValue::Array(items) => {
                assert_eq!(items.len(), 3);
                let contents: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        ParamValue::File(f) => {
                            std::fs::read_to_string(&f.path).unwrap().trim().to_string()
                        }
                        other => panic!("expected file, got {:?}", other),
                    })
                    .collect();
                assert_eq!(contents, vec!["alpha", "beta", "gamma"]);
            }
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_skips_downstream_keeps_independent_branch() {
        let dir = tempdir().unwrap();

        let graph = GraphSpec {
            inputs: Vec::new(),
            steps: vec![
                StepSpec::new("boom", echo_tool("out", Vec::new(), "exit 1")),
                StepSpec::new(
                    "after_boom",
                    echo_tool(
                        "out",
                        vec![ParamDecl::new("dep", ParamType::File)],
                        "echo never > out.txt",
                    ),
                )
                .bind("dep", "boom/out"),
                StepSpec::new("healthy", echo_tool("out", Vec::new(), "echo ok > out.txt")),
            ],
            outputs: Vec::new(),
        };

        let plan = resolve(&graph, &BTreeMap::new()).unwrap();
        let mut engine = engine_for(plan, dir.path());
        let result = engine.run();

        assert!(result.is_err());
        let message = result.unwrap_err().to_string();
        assert!(message.contains("boom"));

        // Independent branch ran to completion; skipped branch did not.
        assert!(dir.path().join("healthy/out.txt").exists());
        assert!(!dir.path().join("after_boom/out.txt").exists());
    }

    #[test]
    fn test_dry_run_executes_nothing() {
        let dir = tempdir().unwrap();

        let graph = GraphSpec {
            inputs: Vec::new(),
            steps: vec![StepSpec::new(
                "emit",
                echo_tool("out", Vec::new(), "echo hello > out.txt"),
            )],
            outputs: Vec::new(),
        };

        let plan = resolve(&graph, &BTreeMap::new()).unwrap();
        let mut engine = engine_for(plan, dir.path());
        engine.set_dry_run(true);

        let outputs = engine.run().unwrap();
        assert!(outputs.is_empty());
        assert!(!dir.path().join("emit/out.txt").exists());
    }

    #[test]
    fn test_deferred_expression_uses_upstream_value() {
        let dir = tempdir().unwrap();

        let graph = GraphSpec {
            inputs: Vec::new(),
            steps: vec![
                StepSpec::new(
                    "make",
                    echo_tool("out", Vec::new(), "echo payload > out.txt"),
                ),
                StepSpec::new(
                    "label",
                    echo_tool(
                        "out",
                        vec![
                            ParamDecl::new("src", ParamType::File),
                            ParamDecl::new("tag", ParamType::Str),
                        ],
                        "echo $(inputs.tag) > out.txt",
                    ),
                )
                .bind("src", "make/out")
                .bind_expr("tag", "$(inputs.src.nameroot + '-labelled')"),
            ],
            outputs: vec![GraphOutput {
                name: "labelled".to_string(),
                from: "label/out".to_string(),
            }],
        };

        let plan = resolve(&graph, &BTreeMap::new()).unwrap();
        let mut engine = engine_for(plan, dir.path());
        let outputs = engine.run().unwrap();

        match &outputs["labelled"] {
            ParamValue::File(f) => {
                let content = std::fs::read_to_string(&f.path).unwrap();
                assert_eq!(content.trim(), "out-labelled");
            }
            other => panic!("expected file, got {:?}", other),
        }
    }

    #[test]
    fn test_materialize_inputs_orders_expressions_last() {
        let tool: ToolSpec = serde_yaml::from_str(
            r#"
command: "true"
inputs:
  - name: sample
    type: string
  - name: derived
    type: string
"#,
        )
        .unwrap();

        let instance = StepInstance {
            id: crate::workflow::plan::InstanceId::new("solo", Vec::new()),
            tool: Arc::new(tool),
            inputs: BTreeMap::from([
                (
                    "derived".to_string(),
                    Slot::Expr("$(inputs.sample + '!')".to_string()),
                ),
                (
                    "sample".to_string(),
                    Slot::Value(ParamValue::Str("hi".to_string())),
                ),
            ]),
            deps: Default::default(),
        };

        let values = materialize_inputs(&instance, &HashMap::new()).unwrap();
        assert_eq!(values["derived"], ParamValue::Str("hi!".to_string()));
    }

    #[test]
    fn test_coerce_deferred_promotes_file_paths() {
        let tool: ToolSpec = serde_yaml::from_str(
            r#"
command: "true"
inputs:
  - name: bam
    type: File
    secondary: ["^.bai"]
"#,
        )
        .unwrap();

        let value = coerce_deferred(&tool, "bam", ParamValue::Str("s.bam".to_string()));
        match value {
            ParamValue::File(f) => {
                assert_eq!(f.path, PathBuf::from("s.bam"));
                assert_eq!(f.secondary, vec![PathBuf::from("s.bai")]);
            }
            other => panic!("expected file, got {:?}", other),
        }
    }

    #[test]
    fn test_materialize_inputs_attaches_consumer_secondaries() {
        use crate::workflow::plan::OutputRef;

        let tool: ToolSpec = serde_yaml::from_str(
            r#"
command: "true"
inputs:
  - name: bam
    type: File
    secondary: ["^.bai"]
"#,
        )
        .unwrap();

        let instance = StepInstance {
            id: crate::workflow::plan::InstanceId::new("call", Vec::new()),
            tool: Arc::new(tool),
            inputs: BTreeMap::from([(
                "bam".to_string(),
                Slot::Output(OutputRef {
                    instance: 0,
                    output: "bam".to_string(),
                }),
            )]),
            deps: Default::default(),
        };

        let mut completed = HashMap::new();
        completed.insert(
            0,
            BTreeMap::from([(
                "bam".to_string(),
                ParamValue::File(FileValue::new("s.bam")),
            )]),
        );

        // The consumer's rules apply to the upstream file on the edge.
        let values = materialize_inputs(&instance, &completed).unwrap();
        match &values["bam"] {
            ParamValue::File(f) => {
                assert_eq!(f.secondary, vec![PathBuf::from("s.bai")])
            }
            other => panic!("expected file, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_expression_recorded_in_state() {
        let dir = tempdir().unwrap();

        let graph = GraphSpec {
            inputs: Vec::new(),
            steps: vec![
                StepSpec::new(
                    "make",
                    echo_tool("out", Vec::new(), "echo payload > out.txt"),
                ),
                StepSpec::new(
                    "label",
                    echo_tool(
                        "out",
                        vec![
                            ParamDecl::new("src", ParamType::File),
                            ParamDecl::new("tag", ParamType::Str),
                        ],
                        "echo $(inputs.tag) > out.txt",
                    ),
                )
                .bind("src", "make/out")
                .bind_expr("tag", "$(inputs.src.sample_name)"),
            ],
            outputs: Vec::new(),
        };

        let plan = resolve(&graph, &BTreeMap::new()).unwrap();
        let stem = dir.path().file_name().and_then(|s| s.to_str()).unwrap();
        let pipeline_path = dir.path().join(format!("{}.yaml", stem));

        let mut engine = Engine::new(plan);
        engine.set_working_dir(dir.path().to_path_buf());
        engine.set_pipeline_path(pipeline_path.to_string_lossy().to_string());

        assert!(engine.run().is_err());

        // The failed expression binding is persisted like any other
        // instance failure, so a resume sees it.
        let state = RunState::load(&pipeline_path.to_string_lossy()).unwrap();
        assert!(state.failed.contains("label"));
        assert!(state.completed.contains("make"));
    }

    #[test]
    fn test_literal_yaml_values_flow_through() {
        let dir = tempdir().unwrap();

        let graph = GraphSpec {
            inputs: Vec::new(),
            steps: vec![StepSpec::new(
                "emit",
                echo_tool(
                    "out",
                    vec![ParamDecl::new("n", ParamType::Int)],
                    "echo $(inputs.n) > out.txt",
                ),
            )
            .bind_literal("n", YamlValue::Number(42.into()))],
            outputs: vec![GraphOutput {
                name: "result".to_string(),
                from: "emit/out".to_string(),
            }],
        };

        let plan = resolve(&graph, &BTreeMap::new()).unwrap();
        let mut engine = engine_for(plan, dir.path());
        let outputs = engine.run().unwrap();

        match &outputs["result"] {
            ParamValue::File(f) => {
                assert_eq!(std::fs::read_to_string(&f.path).unwrap().trim(), "42");
            }
            other => panic!("expected file, got {:?}", other),
        }
    }
}
