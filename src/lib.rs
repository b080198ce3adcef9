//! pipegraph - Workflow Graph Resolution and Execution Engine
//!
//! Resolves YAML pipeline definitions (steps, tools, sub-workflows,
//! scatter) into a flat execution plan and runs it with parallel
//! scheduling. Built for bioinformatics pipelines where a step fans
//! out over samples and downstream steps gather the results.
//!
//! # Architecture
//!
//! The library is organized into three main modules:
//!
//! - [`workflow`]: Definitions, expressions, validation and plan resolution
//! - [`execution`]: Execution engine with parallel scheduling
//! - [`monitoring`]: Resource usage tracking and execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use pipegraph::execution::Engine;
//! use pipegraph::workflow::{load_graph, load_inputs, resolve};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a pipeline and its parameter file
//!     let graph = load_graph(Path::new("pipeline.yaml"))?;
//!     let values = load_inputs(Path::new("inputs.yaml"), &graph)?;
//!
//!     // Validate, inline sub-workflows, expand scatter
//!     let plan = resolve(&graph, &values)?;
//!
//!     // Execute
//!     let mut engine = Engine::new(plan);
//!     engine.set_max_parallel(4);
//!     engine.set_working_dir("/data/analysis");
//!
//!     let outputs = engine.run()?;
//!     for (name, value) in &outputs {
//!         println!("{}: {}", name, value.render());
//!     }
//!     Ok(())
//! }
//! ```

pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use execution::engine::Engine;
pub use workflow::model::{GraphSpec, ParamType, ParamValue, StepSpec, ToolSpec};
pub use workflow::parser::{load_graph, load_inputs};
pub use workflow::plan::ExecutionPlan;
pub use workflow::resolver::resolve;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "pipegraph";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "pipegraph");
    }

    #[test]
    fn test_module_exports_graph() {
        let graph = GraphSpec::default();
        assert!(graph.steps.is_empty());
    }

    #[test]
    fn test_module_exports_param_type() {
        let ty = ParamType::parse("File[]").unwrap();
        assert_eq!(ty, ParamType::Array(Box::new(ParamType::File)));
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(
                part.parse::<u32>().is_ok(),
                "Version components should be numeric"
            );
        }
    }
}
