//! Workflow Definition and Resolution
//!
//! Everything that turns YAML pipeline definitions into an executable
//! plan, ahead of and independent from execution.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (types, values, tools, graphs)
//! - [`parser`]: YAML loading and run-target resolution
//! - [`resolver`]: Validation, ordering, inlining and scatter expansion
//! - [`scatter`]: Dotproduct scatter mechanics
//! - [`expr`]: Inline parameter expressions
//! - [`plan`]: The resolved execution plan
//! - [`errors`]: Resolve-, load- and run-time error taxonomy
//! - [`state`]: Resume state persistence

pub mod errors;
pub mod expr;
pub mod model;
pub mod parser;
pub mod plan;
pub mod resolver;
pub mod scatter;
pub mod state;

pub use errors::{ExecutionError, LoadError, ResolveError};
pub use model::{GraphSpec, ParamType, ParamValue, StepSpec, ToolSpec};
pub use parser::{load_graph, load_inputs};
pub use plan::{ExecutionPlan, InstanceId, StepInstance};
pub use resolver::resolve;
pub use state::RunState;
