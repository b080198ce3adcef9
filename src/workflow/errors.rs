//! Error Taxonomy
//!
//! Resolve-time errors are fatal for the whole run and are raised before
//! any external tool is invoked. Run-time errors are per-instance and
//! propagate along dependency edges.

use thiserror::Error;

use super::expr::ExprError;

/// Errors detected while resolving a graph into an execution plan.
///
/// Every variant names the offending step (and input where one exists)
/// so the failure can be traced back to the pipeline definition.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("step '{step}': required input '{input}' is not bound")]
    UnboundInput { step: String, input: String },

    #[error("cyclic dependency involving step '{step}'")]
    CyclicDependency { step: String },

    #[error("step '{step}', input '{input}': expected {expected}, found {found}")]
    TypeMismatch {
        step: String,
        input: String,
        expected: String,
        found: String,
    },

    #[error("step '{step}': scattered inputs must have equal lengths ({detail})")]
    ScatterLengthMismatch { step: String, detail: String },

    #[error("step '{step}': {source}")]
    ExpressionEvaluation {
        step: String,
        #[source]
        source: ExprError,
    },

    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    #[error("step '{step}': references unknown step '{reference}'")]
    UnknownStep { step: String, reference: String },

    #[error("step '{step}': step '{reference}' has no output '{output}'")]
    UnknownOutput {
        step: String,
        reference: String,
        output: String,
    },

    #[error("step '{step}': scatter names unknown input '{input}'")]
    ScatterUnknownInput { step: String, input: String },

    #[error("step '{step}': run target '{path}' was not resolved at load time")]
    UnresolvedRun { step: String, path: String },

    #[error("workflow has no steps")]
    EmptyGraph,
}

/// Errors raised while executing a resolved plan.
#[derive(Debug, Error, Clone)]
pub enum ExecutionError {
    #[error("instance '{instance}' failed: {detail}")]
    StepExecution { instance: String, detail: String },

    #[error("instance '{instance}' not run: upstream instance '{failed}' failed")]
    UpstreamFailure { instance: String, failed: String },
}

/// Errors raised while loading workflow documents from disk.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse '{path}': {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("workflow files reference each other in a cycle: '{path}'")]
    CircularInclude { path: String },

    #[error("input '{name}' in '{path}': {detail}")]
    Input {
        path: String,
        name: String,
        detail: String,
    },
}
