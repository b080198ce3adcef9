//! Graph Resolution
//!
//! Turns a graph definition plus supplied top-level parameter values into
//! a fully-bound execution plan:
//! - Validates step fields, bindings and references
//! - Detects dependency cycles (Kahn's algorithm)
//! - Topologically orders steps; ties break arbitrarily
//! - Inlines nested sub-workflows, rewriting boundary parameters as
//!   pass-through edges
//! - Expands scattered steps into per-element instances
//!
//! Resolution is a pure, synchronous, single-pass transformation; every
//! error it can raise fires before any external tool runs.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use log::{debug, info, warn};

use super::errors::ResolveError;
use super::expr::{self, ExprError};
use super::model::{
    BindingSource, GraphSpec, ParamType, ParamValue, RunTarget, StepSpec, ToolSpec,
};
use super::plan::{ExecutionPlan, InstanceId, OutputRef, Slot, StepInstance};
use super::scatter;

/// Step name used when reporting problems with the top-level inputs.
const WORKFLOW_LEVEL: &str = "<workflow>";

/// Resolves a graph against supplied top-level values.
///
/// On success the returned plan lists every concrete tool invocation in
/// a valid execution order, with all parameters bound.
pub fn resolve(
    graph: &GraphSpec,
    values: &BTreeMap<String, ParamValue>,
) -> Result<ExecutionPlan, ResolveError> {
    validate_graph(graph, "")?;

    // Bind the top-level inputs.
    let mut scope: BTreeMap<String, Slot> = BTreeMap::new();
    for decl in &graph.inputs {
        let value = match values.get(&decl.name) {
            Some(value) => {
                check_value_type(WORKFLOW_LEVEL, &decl.name, &decl.ty, value)?;
                value.clone()
            }
            None => match &decl.default {
                Some(raw) => ParamValue::from_yaml(&decl.ty, raw).map_err(|found| {
                    ResolveError::TypeMismatch {
                        step: WORKFLOW_LEVEL.to_string(),
                        input: decl.name.clone(),
                        expected: decl.ty.to_string(),
                        found,
                    }
                })?,
                None => {
                    return Err(ResolveError::UnboundInput {
                        step: WORKFLOW_LEVEL.to_string(),
                        input: decl.name.clone(),
                    })
                }
            },
        };
        let mut value = value;
        value.attach_secondary(&decl.secondary);
        scope.insert(decl.name.clone(), Slot::Value(value));
    }

    let mut builder = PlanBuilder {
        instances: Vec::new(),
    };
    let outputs = builder.expand_graph(graph, &scope, "", &[])?;

    info!(
        "resolved plan: {} instances, {} workflow outputs",
        builder.instances.len(),
        outputs.len()
    );

    Ok(ExecutionPlan {
        instances: builder.instances,
        outputs,
    })
}

/// Structural validation of one graph level, recursing into inline
/// sub-workflows. Collects nothing: the first problem is fatal.
fn validate_graph(graph: &GraphSpec, prefix: &str) -> Result<(), ResolveError> {
    if graph.steps.is_empty() {
        return Err(ResolveError::EmptyGraph);
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for step in &graph.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(ResolveError::DuplicateStep(qualify(prefix, &step.id)));
        }
    }

    for step in &graph.steps {
        let qualified = qualify(prefix, &step.id);

        match &step.run {
            RunTarget::Path(path) => {
                return Err(ResolveError::UnresolvedRun {
                    step: qualified,
                    path: path.clone(),
                })
            }
            RunTarget::Graph(sub) => validate_graph(sub, &qualified)?,
            RunTarget::Tool(_) => {}
        }

        let decls = step.run.input_decls();

        for decl in decls {
            if decl.required() && !step.inputs.contains_key(&decl.name) {
                return Err(ResolveError::UnboundInput {
                    step: qualified,
                    input: decl.name.clone(),
                });
            }
        }

        for (name, source) in &step.inputs {
            if decls.iter().all(|d| &d.name != name) {
                warn!(
                    "step '{}': binding '{}' matches no declared input",
                    qualified, name
                );
            }

            match source {
                BindingSource::Reference(reference) => {
                    if let Some((producer, output)) = reference.split_once('/') {
                        match graph.step(producer) {
                            None => {
                                return Err(ResolveError::UnknownStep {
                                    step: qualified,
                                    reference: producer.to_string(),
                                })
                            }
                            Some(upstream) => {
                                if !upstream.run.output_names().contains(&output) {
                                    return Err(ResolveError::UnknownOutput {
                                        step: qualified,
                                        reference: producer.to_string(),
                                        output: output.to_string(),
                                    });
                                }
                            }
                        }
                    } else if graph.input(reference).is_none() {
                        return Err(ResolveError::UnknownStep {
                            step: qualified,
                            reference: reference.clone(),
                        });
                    }
                }
                BindingSource::Expression(text) => {
                    for path in expr::template_references(text) {
                        let root = path.first().map(String::as_str).unwrap_or_default();
                        if root != "inputs" {
                            return Err(ResolveError::ExpressionEvaluation {
                                step: qualified,
                                source: ExprError(format!(
                                    "unknown identifier '{}' (expressions see sibling \
                                     inputs as 'inputs.*')",
                                    root
                                )),
                            });
                        }
                        if let Some(field) = path.get(1) {
                            if decls.iter().all(|d| &d.name != field) {
                                return Err(ResolveError::ExpressionEvaluation {
                                    step: qualified,
                                    source: ExprError(format!(
                                        "references undeclared input '{}'",
                                        field
                                    )),
                                });
                            }
                        }
                    }
                }
                BindingSource::Literal(_) => {}
            }
        }

        for scattered in &step.scatter {
            if !step.inputs.contains_key(scattered) {
                return Err(ResolveError::ScatterUnknownInput {
                    step: qualified,
                    input: scattered.clone(),
                });
            }
        }
    }

    topological_order(graph, prefix).map(|_| ())
}

/// Topological order of step indices using Kahn's algorithm. A graph
/// where some step (directly or transitively) depends on its own output
/// fails with [`ResolveError::CyclicDependency`].
fn topological_order(graph: &GraphSpec, prefix: &str) -> Result<Vec<usize>, ResolveError> {
    let index_of: HashMap<&str, usize> = graph
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); graph.steps.len()];
    let mut in_degree: Vec<usize> = vec![0; graph.steps.len()];

    for (idx, step) in graph.steps.iter().enumerate() {
        let mut producers = BTreeSet::new();
        for source in step.inputs.values() {
            if let BindingSource::Reference(reference) = source {
                if let Some((producer, _)) = reference.split_once('/') {
                    if let Some(&p) = index_of.get(producer) {
                        producers.insert(p);
                    }
                }
            }
        }
        in_degree[idx] = producers.len();
        for p in producers {
            dependents[p].insert(idx);
        }
    }

    let mut queue: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(graph.steps.len());
    while let Some(current) = queue.pop_front() {
        order.push(current);
        for &next in &dependents[current] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != graph.steps.len() {
        let stuck = graph
            .steps
            .iter()
            .enumerate()
            .find(|(i, _)| in_degree[*i] > 0)
            .map(|(_, s)| qualify(prefix, &s.id))
            .unwrap_or_else(|| prefix.to_string());
        return Err(ResolveError::CyclicDependency { step: stuck });
    }

    debug!(
        "topological order under '{}': {:?}",
        prefix,
        order
            .iter()
            .map(|&i| graph.steps[i].id.as_str())
            .collect::<Vec<_>>()
    );

    Ok(order)
}

fn qualify(prefix: &str, id: &str) -> String {
    if prefix.is_empty() {
        id.to_string()
    } else {
        format!("{}.{}", prefix, id)
    }
}

/// Checks a concrete value against a declared type. Empty arrays feed
/// any array type.
fn check_value_type(
    step: &str,
    input: &str,
    expected: &ParamType,
    value: &ParamValue,
) -> Result<(), ResolveError> {
    if let ParamValue::Array(items) = value {
        if items.is_empty() && matches!(expected, ParamType::Array(_)) {
            return Ok(());
        }
    }
    let found = value.param_type();
    if found.feeds(expected) {
        return Ok(());
    }
    Err(ResolveError::TypeMismatch {
        step: step.to_string(),
        input: input.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    })
}

struct PlanBuilder {
    instances: Vec<StepInstance>,
}

impl PlanBuilder {
    /// Expands one graph level into plan instances. `scope` carries the
    /// graph's input slots, `prefix`/`indices` the enclosing step path
    /// and scatter index tuple. Returns the graph's output slots.
    fn expand_graph(
        &mut self,
        graph: &GraphSpec,
        scope: &BTreeMap<String, Slot>,
        prefix: &str,
        indices: &[usize],
    ) -> Result<BTreeMap<String, Slot>, ResolveError> {
        let order = topological_order(graph, prefix)?;

        // Outputs of already-expanded steps, keyed by step id.
        let mut produced: HashMap<&str, BTreeMap<String, Slot>> = HashMap::new();

        for idx in order {
            let step = &graph.steps[idx];
            let qualified = qualify(prefix, &step.id);
            let bound = self.bind_step_inputs(step, &qualified, scope, &produced)?;

            let outputs = if step.scatter.is_empty() {
                match &step.run {
                    RunTarget::Tool(tool) => {
                        self.push_instance(&qualified, indices.to_vec(), tool, bound)
                    }
                    RunTarget::Graph(sub) => {
                        self.expand_graph(sub, &bound, &qualified, indices)?
                    }
                    RunTarget::Path(path) => {
                        return Err(ResolveError::UnresolvedRun {
                            step: qualified,
                            path: path.clone(),
                        })
                    }
                }
            } else {
                self.expand_scattered(step, &qualified, indices, bound)?
            };

            produced.insert(step.id.as_str(), outputs);
        }

        // Rewrite the graph's boundary outputs as pass-through slots.
        let mut outputs = BTreeMap::new();
        for out in &graph.outputs {
            let (producer, name) = out.from.split_once('/').ok_or_else(|| {
                ResolveError::UnknownStep {
                    step: qualify(prefix, "outputs"),
                    reference: out.from.clone(),
                }
            })?;
            let slot = produced
                .get(producer)
                .and_then(|m| m.get(name))
                .cloned()
                .ok_or_else(|| ResolveError::UnknownOutput {
                    step: qualify(prefix, "outputs"),
                    reference: producer.to_string(),
                    output: name.to_string(),
                })?;
            outputs.insert(out.name.clone(), slot);
        }

        Ok(outputs)
    }

    /// Expands a scattered step into per-element instances and gathers
    /// its outputs in instance order.
    fn expand_scattered(
        &mut self,
        step: &StepSpec,
        qualified: &str,
        indices: &[usize],
        bound: BTreeMap<String, Slot>,
    ) -> Result<BTreeMap<String, Slot>, ResolveError> {
        let scattered: Vec<(&str, &Slot)> = step
            .scatter
            .iter()
            .map(|name| (name.as_str(), &bound[name.as_str()]))
            .collect();
        let count = scatter::scatter_length(qualified, &scattered)?;

        debug!(
            "scattering '{}' into {} instances over {:?}",
            qualified, count, step.scatter
        );

        let mut gathered: BTreeMap<String, Vec<Slot>> = step
            .run
            .output_names()
            .into_iter()
            .map(|name| (name.to_string(), Vec::with_capacity(count)))
            .collect();

        for i in 0..count {
            let mut instance_inputs = scatter::instance_inputs(&bound, &step.scatter, i);
            // Expressions over scattered siblings become ready once the
            // projection has replaced the array with element *i*.
            evaluate_ready_expressions(
                step.run.input_decls(),
                qualified,
                &[],
                &mut instance_inputs,
            )?;
            let mut instance_indices = indices.to_vec();
            instance_indices.push(i);

            let outputs = match &step.run {
                RunTarget::Tool(tool) => {
                    self.push_instance(qualified, instance_indices, tool, instance_inputs)
                }
                RunTarget::Graph(sub) => {
                    self.expand_graph(sub, &instance_inputs, qualified, &instance_indices)?
                }
                RunTarget::Path(path) => {
                    return Err(ResolveError::UnresolvedRun {
                        step: qualified.to_string(),
                        path: path.clone(),
                    })
                }
            };

            for (name, slot) in outputs {
                gathered.entry(name).or_default().push(slot);
            }
        }

        Ok(gathered
            .into_iter()
            .map(|(name, slots)| (name, scatter::gather(slots)))
            .collect())
    }

    /// Binds a step's inputs to slots: defaults, references, literals
    /// first, then expressions (which may read the sibling values).
    fn bind_step_inputs(
        &self,
        step: &StepSpec,
        qualified: &str,
        scope: &BTreeMap<String, Slot>,
        produced: &HashMap<&str, BTreeMap<String, Slot>>,
    ) -> Result<BTreeMap<String, Slot>, ResolveError> {
        let decls = step.run.input_decls();
        let mut bound: BTreeMap<String, Slot> = BTreeMap::new();

        // Defaults for inputs without an explicit binding.
        for decl in decls {
            if step.inputs.contains_key(&decl.name) {
                continue;
            }
            if let Some(raw) = &decl.default {
                let mut value = ParamValue::from_yaml(&decl.ty, raw).map_err(|found| {
                    ResolveError::TypeMismatch {
                        step: qualified.to_string(),
                        input: decl.name.clone(),
                        expected: decl.ty.to_string(),
                        found,
                    }
                })?;
                value.attach_secondary(&decl.secondary);
                bound.insert(decl.name.clone(), Slot::Value(value));
            }
        }

        for (name, source) in &step.inputs {
            let decl = decls.iter().find(|d| &d.name == name);
            let expected = decl.map(|d| {
                if step.scatter.iter().any(|s| s == name) {
                    ParamType::Array(Box::new(d.ty.clone()))
                } else {
                    d.ty.clone()
                }
            });

            let slot = match source {
                BindingSource::Reference(reference) => {
                    let mut slot =
                        self.resolve_reference(reference, qualified, scope, produced)?;
                    // The consumer's secondary rules apply to whatever
                    // file arrives on the edge, not just to literals.
                    if let (Some(decl), Slot::Value(value)) = (decl, &mut slot) {
                        value.attach_secondary(&decl.secondary);
                    }
                    slot
                }
                BindingSource::Literal(raw) => {
                    let ty = expected.clone().unwrap_or(ParamType::Str);
                    let mut value = ParamValue::from_yaml(&ty, raw).map_err(|found| {
                        ResolveError::TypeMismatch {
                            step: qualified.to_string(),
                            input: name.clone(),
                            expected: ty.to_string(),
                            found,
                        }
                    })?;
                    if let Some(decl) = decl {
                        value.attach_secondary(&decl.secondary);
                    }
                    Slot::Value(value)
                }
                // Second pass below.
                BindingSource::Expression(_) => continue,
            };

            if let Some(expected) = &expected {
                self.check_slot_type(qualified, name, expected, &slot)?;
            }
            bound.insert(name.clone(), slot);
        }

        // Expressions bind deferred first; the ones whose referenced
        // siblings are already concrete are then evaluated in place.
        // Anything reading a scattered sibling must wait for the
        // per-element projection, or it would see the whole array.
        for (name, source) in &step.inputs {
            if let BindingSource::Expression(text) = source {
                bound.insert(name.clone(), Slot::Expr(text.clone()));
            }
        }
        evaluate_ready_expressions(decls, qualified, &step.scatter, &mut bound)?;

        Ok(bound)
    }

    fn resolve_reference(
        &self,
        reference: &str,
        qualified: &str,
        scope: &BTreeMap<String, Slot>,
        produced: &HashMap<&str, BTreeMap<String, Slot>>,
    ) -> Result<Slot, ResolveError> {
        if let Some((producer, output)) = reference.split_once('/') {
            produced
                .get(producer)
                .ok_or_else(|| ResolveError::UnknownStep {
                    step: qualified.to_string(),
                    reference: producer.to_string(),
                })?
                .get(output)
                .cloned()
                .ok_or_else(|| ResolveError::UnknownOutput {
                    step: qualified.to_string(),
                    reference: producer.to_string(),
                    output: output.to_string(),
                })
        } else {
            scope
                .get(reference)
                .cloned()
                .ok_or_else(|| ResolveError::UnknownStep {
                    step: qualified.to_string(),
                    reference: reference.to_string(),
                })
        }
    }

    /// Type-checks a bound slot against the declared input type.
    fn check_slot_type(
        &self,
        step: &str,
        input: &str,
        expected: &ParamType,
        slot: &Slot,
    ) -> Result<(), ResolveError> {
        match self.slot_type(slot) {
            None => Ok(()),
            Some(found) => {
                if found.feeds(expected) {
                    Ok(())
                } else {
                    Err(ResolveError::TypeMismatch {
                        step: step.to_string(),
                        input: input.to_string(),
                        expected: expected.to_string(),
                        found: found.to_string(),
                    })
                }
            }
        }
    }

    /// Static type of a slot, where one is known. Empty gathers and
    /// deferred expressions are unchecked.
    fn slot_type(&self, slot: &Slot) -> Option<ParamType> {
        match slot {
            Slot::Value(ParamValue::Array(items)) if items.is_empty() => None,
            Slot::Value(value) => Some(value.param_type()),
            Slot::Output(r) => self.instances[r.instance]
                .tool
                .output(&r.output)
                .map(|o| o.ty.clone()),
            Slot::List(items) => {
                let first = self.slot_type(items.first()?)?;
                Some(ParamType::Array(Box::new(first)))
            }
            Slot::Expr(_) => None,
        }
    }

    /// Appends one concrete instance and returns slots for its outputs.
    fn push_instance(
        &mut self,
        qualified: &str,
        indices: Vec<usize>,
        tool: &ToolSpec,
        inputs: BTreeMap<String, Slot>,
    ) -> BTreeMap<String, Slot> {
        let index = self.instances.len();
        let mut deps = BTreeSet::new();
        for slot in inputs.values() {
            slot.collect_deps(&mut deps);
        }

        self.instances.push(StepInstance {
            id: InstanceId::new(qualified, indices),
            tool: Arc::new(tool.clone()),
            inputs,
            deps,
        });

        tool.outputs
            .iter()
            .map(|o| {
                (
                    o.name.clone(),
                    Slot::Output(OutputRef {
                        instance: index,
                        output: o.name.clone(),
                    }),
                )
            })
            .collect()
    }
}

/// Evaluates in place every expression slot whose referenced siblings
/// are all concrete values, leaving the rest deferred. Expressions that
/// read a scattered sibling are never ready here: they are re-examined
/// per instance after projection, so each one sees its own element.
fn evaluate_ready_expressions(
    decls: &[super::model::ParamDecl],
    qualified: &str,
    scatter: &[String],
    bound: &mut BTreeMap<String, Slot>,
) -> Result<(), ResolveError> {
    let pending: Vec<(String, String)> = bound
        .iter()
        .filter_map(|(name, slot)| match slot {
            Slot::Expr(text) => Some((name.clone(), text.clone())),
            _ => None,
        })
        .collect();

    for (name, text) in pending {
        let ready = expr::template_references(&text).iter().all(|path| {
            path.get(1)
                .map(|sibling| {
                    !scatter.iter().any(|s| s == sibling)
                        && matches!(bound.get(sibling), Some(Slot::Value(_)))
                })
                .unwrap_or(false)
        });
        if !ready {
            continue;
        }

        let siblings: BTreeMap<String, ParamValue> = bound
            .iter()
            .filter_map(|(k, slot)| match slot {
                Slot::Value(v) => Some((k.clone(), v.clone())),
                _ => None,
            })
            .collect();
        let mut expr_scope = expr::Scope::new();
        expr_scope.insert("inputs".to_string(), ParamValue::Record(siblings));

        let value = expr::evaluate_template(&text, &expr_scope).map_err(|source| {
            ResolveError::ExpressionEvaluation {
                step: qualified.to_string(),
                source,
            }
        })?;
        let value = coerce_expression_value(decls, &name, value);
        bound.insert(name, Slot::Value(value));
    }

    Ok(())
}

/// A string produced by an expression feeding a File-typed input becomes
/// a file handle, with the declared secondary rules attached.
fn coerce_expression_value(
    decls: &[super::model::ParamDecl],
    name: &str,
    value: ParamValue,
) -> ParamValue {
    let Some(decl) = decls.iter().find(|d| d.name == name) else {
        return value;
    };
    let mut value = match (&decl.ty, value) {
        (ParamType::File, ParamValue::Str(path)) => {
            ParamValue::File(super::model::FileValue::new(path))
        }
        (_, value) => value,
    };
    value.attach_secondary(&decl.secondary);
    value
}
