//! Workflow Loading
//!
//! Reads pipeline and tool definitions from YAML files. A step's `run`
//! field may name another document; those references are resolved here,
//! relative to the referencing file, so the rest of the crate only ever
//! sees inline tools and sub-workflows.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde_yaml::Value as YamlValue;

use super::errors::LoadError;
use super::model::{GraphSpec, ParamValue, RunTarget};

/// Loads a pipeline definition, resolving every `run: path` reference.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
/// use pipegraph::workflow::load_graph;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let graph = load_graph(Path::new("pipeline.yaml"))?;
///     println!("loaded {} steps", graph.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_graph(path: &Path) -> Result<GraphSpec, LoadError> {
    info!("loading pipeline from: {}", path.display());
    let mut visiting = Vec::new();
    load_graph_guarded(path, &mut visiting)
}

fn load_graph_guarded(
    path: &Path,
    visiting: &mut Vec<PathBuf>,
) -> Result<GraphSpec, LoadError> {
    enter(path, visiting)?;

    let text = read_document(path)?;
    let mut graph: GraphSpec =
        serde_yaml::from_str(&text).map_err(|source| LoadError::Yaml {
            path: path.display().to_string(),
            source,
        })?;

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    resolve_run_targets(&mut graph, &dir, visiting)?;

    visiting.pop();
    debug!("loaded {} steps from {}", graph.steps.len(), path.display());
    Ok(graph)
}

/// Replaces every `RunTarget::Path` in the graph with the parsed
/// document it names, recursing through inline sub-workflows.
fn resolve_run_targets(
    graph: &mut GraphSpec,
    dir: &Path,
    visiting: &mut Vec<PathBuf>,
) -> Result<(), LoadError> {
    for step in &mut graph.steps {
        match &mut step.run {
            RunTarget::Path(relative) => {
                let target = dir.join(relative.as_str());
                debug!("step '{}': resolving run target {}", step.id, target.display());
                step.run = load_run_document(&target, visiting)?;
            }
            RunTarget::Graph(sub) => resolve_run_targets(sub, dir, visiting)?,
            RunTarget::Tool(_) => {}
        }
    }
    Ok(())
}

/// Loads one referenced document as a tool or sub-workflow.
fn load_run_document(
    path: &Path,
    visiting: &mut Vec<PathBuf>,
) -> Result<RunTarget, LoadError> {
    enter(path, visiting)?;

    let text = read_document(path)?;
    let mut target: RunTarget =
        serde_yaml::from_str(&text).map_err(|source| LoadError::Yaml {
            path: path.display().to_string(),
            source,
        })?;

    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    match &mut target {
        RunTarget::Graph(sub) => resolve_run_targets(sub, &dir, visiting)?,
        RunTarget::Path(relative) => {
            // A document that is itself just a path: follow it.
            let next = dir.join(relative.as_str());
            target = load_run_document(&next, visiting)?;
        }
        RunTarget::Tool(_) => {}
    }

    visiting.pop();
    Ok(target)
}

/// Cycle guard over the chain of documents currently being loaded.
fn enter(path: &Path, visiting: &mut Vec<PathBuf>) -> Result<(), LoadError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if visiting.contains(&canonical) {
        return Err(LoadError::CircularInclude {
            path: path.display().to_string(),
        });
    }
    visiting.push(canonical);
    Ok(())
}

fn read_document(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Loads a run's parameter values, coercing each against the pipeline's
/// declared input types and attaching declared secondary files.
///
/// Values with no matching declaration are ignored with a warning.
pub fn load_inputs(
    path: &Path,
    graph: &GraphSpec,
) -> Result<BTreeMap<String, ParamValue>, LoadError> {
    info!("loading parameter values from: {}", path.display());

    let text = read_document(path)?;
    let raw: BTreeMap<String, YamlValue> =
        serde_yaml::from_str(&text).map_err(|source| LoadError::Yaml {
            path: path.display().to_string(),
            source,
        })?;

    let mut values = BTreeMap::new();
    for (name, value) in raw {
        let decl = match graph.input(&name) {
            Some(decl) => decl,
            None => {
                warn!("'{}' declares no input named '{}'", path.display(), name);
                continue;
            }
        };

        let mut value =
            ParamValue::from_yaml(&decl.ty, &value).map_err(|detail| LoadError::Input {
                path: path.display().to_string(),
                name: name.clone(),
                detail,
            })?;
        value.attach_secondary(&decl.secondary);
        values.insert(name, value);
    }

    debug!("loaded {} parameter values", values.len());
    Ok(values)
}

/// Writes a pipeline definition back to a YAML file.
pub fn save_graph(graph: &GraphSpec, path: &Path) -> Result<(), LoadError> {
    let text = serde_yaml::to_string(graph).map_err(|source| LoadError::Yaml {
        path: path.display().to_string(),
        source,
    })?;
    fs::write(path, text).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    info!("pipeline saved to: {}", path.display());
    Ok(())
}
