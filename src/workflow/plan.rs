//! Resolved Execution Plan
//!
//! The output of graph resolution: a flat, topologically ordered list of
//! concrete tool invocations with every parameter bound to a value, an
//! upstream output, or a deferred expression. The plan is pure data; the
//! execution engine interprets it.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use super::model::{ParamValue, ToolSpec};

/// A reference to one output of one planned instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRef {
    /// Index into [`ExecutionPlan::instances`].
    pub instance: usize,
    pub output: String,
}

/// A bound input: either a concrete value, a pending upstream output, an
/// ordered gather of slots, or an expression evaluated once the sibling
/// inputs are materialized.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Value(ParamValue),
    Output(OutputRef),
    List(Vec<Slot>),
    Expr(String),
}

impl Slot {
    /// Statically known length, for array-shaped slots.
    pub fn known_len(&self) -> Option<usize> {
        match self {
            Slot::Value(ParamValue::Array(items)) => Some(items.len()),
            Slot::List(items) => Some(items.len()),
            _ => None,
        }
    }

    /// Element *i* of an array-shaped slot. Callers check lengths first.
    pub fn element(&self, i: usize) -> Option<Slot> {
        match self {
            Slot::Value(ParamValue::Array(items)) => {
                items.get(i).cloned().map(Slot::Value)
            }
            Slot::List(items) => items.get(i).cloned(),
            _ => None,
        }
    }

    /// Collects the plan indices this slot depends on.
    pub fn collect_deps(&self, deps: &mut BTreeSet<usize>) {
        match self {
            Slot::Output(r) => {
                deps.insert(r.instance);
            }
            Slot::List(items) => {
                for item in items {
                    item.collect_deps(deps);
                }
            }
            Slot::Value(_) | Slot::Expr(_) => {}
        }
    }

    /// Materializes this slot against the outputs of completed
    /// instances. Expression slots are evaluated separately by the
    /// executor, after the sibling inputs exist.
    pub fn materialize(
        &self,
        completed: &HashMap<usize, BTreeMap<String, ParamValue>>,
    ) -> Result<ParamValue, String> {
        match self {
            Slot::Value(value) => Ok(value.clone()),
            Slot::Output(r) => completed
                .get(&r.instance)
                .and_then(|outs| outs.get(&r.output))
                .cloned()
                .ok_or_else(|| {
                    format!("output '{}' of instance {} unavailable", r.output, r.instance)
                }),
            Slot::List(items) => {
                let values = items
                    .iter()
                    .map(|s| s.materialize(completed))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ParamValue::Array(values))
            }
            Slot::Expr(text) => Err(format!("expression '{}' not yet evaluated", text)),
        }
    }
}

/// Identity of a planned instance: the dotted step path through nested
/// sub-workflows, plus the scatter index tuple (outermost first).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId {
    pub path: String,
    pub indices: Vec<usize>,
}

impl InstanceId {
    pub fn new(path: impl Into<String>, indices: Vec<usize>) -> Self {
        Self {
            path: path.into(),
            indices,
        }
    }

    /// Relative working directory for this instance. Index components
    /// become nested directories so sibling scatter elements can never
    /// alias each other's files.
    pub fn work_dir(&self) -> String {
        let mut dir = self.path.clone();
        for idx in &self.indices {
            dir.push('/');
            dir.push_str(&idx.to_string());
        }
        dir
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.indices.is_empty() {
            write!(f, "{}", self.path)
        } else {
            let indices = self
                .indices
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(".");
            write!(f, "{}[{}]", self.path, indices)
        }
    }
}

/// One fully-bound tool invocation in the plan.
#[derive(Debug, Clone)]
pub struct StepInstance {
    pub id: InstanceId,
    pub tool: Arc<ToolSpec>,
    pub inputs: BTreeMap<String, Slot>,
    /// Plan indices of instances that must complete first.
    pub deps: BTreeSet<usize>,
}

/// A fully-resolved plan: instances in a valid execution order plus the
/// graph-level output bindings.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    pub instances: Vec<StepInstance>,
    pub outputs: BTreeMap<String, Slot>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Direct dependents of every instance, for failure propagation.
    pub fn dependents(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.instances.len()];
        for (idx, instance) in self.instances.iter().enumerate() {
            for dep in &instance.deps {
                dependents[*dep].push(idx);
            }
        }
        dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_display() {
        let plain = InstanceId::new("align", Vec::new());
        assert_eq!(plain.to_string(), "align");

        let nested = InstanceId::new("module_1.collapse", vec![1, 0]);
        assert_eq!(nested.to_string(), "module_1.collapse[1.0]");
        assert_eq!(nested.work_dir(), "module_1.collapse/1/0");
    }

    #[test]
    fn test_slot_element_and_len() {
        let slot = Slot::Value(ParamValue::Array(vec![
            ParamValue::Int(1),
            ParamValue::Int(2),
        ]));
        assert_eq!(slot.known_len(), Some(2));
        assert_eq!(slot.element(1), Some(Slot::Value(ParamValue::Int(2))));
        assert_eq!(slot.element(2), None);

        let pending = Slot::Output(OutputRef {
            instance: 0,
            output: "bam".to_string(),
        });
        assert_eq!(pending.known_len(), None);
    }

    #[test]
    fn test_slot_collect_deps_recurses() {
        let slot = Slot::List(vec![
            Slot::Output(OutputRef {
                instance: 3,
                output: "vcf".to_string(),
            }),
            Slot::Output(OutputRef {
                instance: 5,
                output: "vcf".to_string(),
            }),
        ]);
        let mut deps = BTreeSet::new();
        slot.collect_deps(&mut deps);
        assert_eq!(deps.into_iter().collect::<Vec<_>>(), vec![3, 5]);
    }

    #[test]
    fn test_slot_materialize_gather_preserves_order() {
        let mut completed = HashMap::new();
        completed.insert(
            0,
            BTreeMap::from([("out".to_string(), ParamValue::Str("a".to_string()))]),
        );
        completed.insert(
            1,
            BTreeMap::from([("out".to_string(), ParamValue::Str("b".to_string()))]),
        );

        let slot = Slot::List(vec![
            Slot::Output(OutputRef {
                instance: 0,
                output: "out".to_string(),
            }),
            Slot::Output(OutputRef {
                instance: 1,
                output: "out".to_string(),
            }),
        ]);
        assert_eq!(
            slot.materialize(&completed).unwrap(),
            ParamValue::Array(vec![
                ParamValue::Str("a".to_string()),
                ParamValue::Str("b".to_string()),
            ])
        );
    }

    #[test]
    fn test_plan_dependents() {
        use crate::workflow::model::ToolSpec;

        let tool = Arc::new(ToolSpec {
            inputs: Vec::new(),
            command: "true".to_string(),
            outputs: Vec::new(),
            cores: 1,
            memory_mb: None,
        });

        let mut plan = ExecutionPlan::default();
        plan.instances.push(StepInstance {
            id: InstanceId::new("a", Vec::new()),
            tool: Arc::clone(&tool),
            inputs: BTreeMap::new(),
            deps: BTreeSet::new(),
        });
        plan.instances.push(StepInstance {
            id: InstanceId::new("b", Vec::new()),
            tool,
            inputs: BTreeMap::new(),
            deps: BTreeSet::from([0]),
        });

        assert_eq!(plan.dependents(), vec![vec![1], Vec::new()]);
    }
}
