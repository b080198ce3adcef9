//! Individual Instance Execution
//!
//! Runs one plan instance: materializes its working directory, renders
//! the tool's command template against the bound inputs, executes it
//! under bash, and collects the declared outputs.
//!
//! Every instance runs in its own directory under the run's working
//! directory (`<working_dir>/<step path>/<scatter indices...>`), so
//! sibling scatter elements can never clobber each other's files.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, error, warn};

use crate::workflow::errors::ExecutionError;
use crate::workflow::expr;
use crate::workflow::model::{FileValue, ParamValue};
use crate::workflow::plan::StepInstance;

const SCRIPT_NAME: &str = ".run.sh";

/// Longest stderr excerpt carried into an error message.
const STDERR_EXCERPT: usize = 2048;

/// Executes one instance with fully materialized inputs.
///
/// Returns the instance's output values on success. Any failure mode
/// (command template error, non-zero exit, missing declared output)
/// surfaces as [`ExecutionError::StepExecution`] naming the instance.
pub fn execute_instance(
    instance: &StepInstance,
    inputs: &BTreeMap<String, ParamValue>,
    working_dir: &Path,
) -> Result<BTreeMap<String, ParamValue>, ExecutionError> {
    let instance_name = instance.id.to_string();
    let work_dir = working_dir.join(instance.id.work_dir());

    fs::create_dir_all(&work_dir).map_err(|e| ExecutionError::StepExecution {
        instance: instance_name.clone(),
        detail: format!("could not create work dir '{}': {}", work_dir.display(), e),
    })?;

    let scope = input_scope(inputs);
    let command = expr::interpolate(&instance.tool.command, &scope).map_err(|e| {
        ExecutionError::StepExecution {
            instance: instance_name.clone(),
            detail: format!("command template: {}", e),
        }
    })?;

    let script_path = write_script(&work_dir, &command).map_err(|e| {
        ExecutionError::StepExecution {
            instance: instance_name.clone(),
            detail: format!("could not write execution script: {}", e),
        }
    })?;

    debug!("instance '{}': {}", instance_name, command);

    let output = Command::new("bash")
        .arg(&script_path)
        .current_dir(&work_dir)
        .output()
        .map_err(|e| ExecutionError::StepExecution {
            instance: instance_name.clone(),
            detail: format!("could not launch bash: {}", e),
        })?;

    if let Err(e) = fs::remove_file(&script_path) {
        warn!("failed to clean up {}: {}", script_path.display(), e);
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let excerpt: String = stderr.chars().take(STDERR_EXCERPT).collect();

        error!(
            "instance '{}' exited with {:?}",
            instance_name,
            output.status.code()
        );
        if !excerpt.trim().is_empty() {
            error!("stderr:\n{}", excerpt);
        }

        return Err(ExecutionError::StepExecution {
            instance: instance_name,
            detail: match output.status.code() {
                Some(code) => format!("command exited with status {}", code),
                None => "command terminated by signal".to_string(),
            },
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        debug!("instance '{}' stdout:\n{}", instance_name, stdout);
    }

    collect_outputs(instance, inputs, &work_dir)
}

/// Locates and returns the declared outputs of an instance whose
/// command has already run. A declared output whose file is missing is
/// an execution failure, never a silent gap.
pub fn collect_outputs(
    instance: &StepInstance,
    inputs: &BTreeMap<String, ParamValue>,
    work_dir: &Path,
) -> Result<BTreeMap<String, ParamValue>, ExecutionError> {
    let instance_name = instance.id.to_string();
    let scope = input_scope(inputs);

    let mut values = BTreeMap::new();
    for declared in &instance.tool.outputs {
        let relative = expr::interpolate(&declared.path, &scope).map_err(|e| {
            ExecutionError::StepExecution {
                instance: instance_name.clone(),
                detail: format!("output path template for '{}': {}", declared.name, e),
            }
        })?;

        let path = work_dir.join(&relative);
        if !path.exists() {
            return Err(ExecutionError::StepExecution {
                instance: instance_name.clone(),
                detail: format!(
                    "declared output '{}' not found at '{}'",
                    declared.name,
                    path.display()
                ),
            });
        }

        let mut file = FileValue::new(path);
        for rule in &declared.secondary {
            let companion = rule.resolve(&file.path);
            if !companion.exists() {
                return Err(ExecutionError::StepExecution {
                    instance: instance_name.clone(),
                    detail: format!(
                        "secondary file '{}' for output '{}' not found",
                        companion.display(),
                        declared.name
                    ),
                });
            }
            file.secondary.push(companion);
        }

        values.insert(declared.name.clone(), ParamValue::File(file));
    }

    Ok(values)
}

/// Scope seen by command and output-path templates: the bound inputs as
/// one `inputs` record.
fn input_scope(inputs: &BTreeMap<String, ParamValue>) -> expr::Scope {
    let mut scope = expr::Scope::new();
    scope.insert("inputs".to_string(), ParamValue::Record(inputs.clone()));
    scope
}

fn write_script(work_dir: &Path, command: &str) -> std::io::Result<PathBuf> {
    let script_path = work_dir.join(SCRIPT_NAME);
    let mut file = File::create(&script_path)?;

    writeln!(file, "#!/bin/bash")?;
    writeln!(file, "set -e")?;
    writeln!(file, "{}", command)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o755))?;
    }

    Ok(script_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{
        ParamDecl, ParamType, SecondaryFileRule, ToolOutput, ToolSpec,
    };
    use crate::workflow::plan::InstanceId;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn instance(command: &str, outputs: Vec<ToolOutput>) -> StepInstance {
        StepInstance {
            id: InstanceId::new("call_variants", vec![1]),
            tool: Arc::new(ToolSpec {
                inputs: vec![ParamDecl::new("sample", ParamType::Str)],
                command: command.to_string(),
                outputs,
                cores: 1,
                memory_mb: None,
            }),
            inputs: BTreeMap::new(),
            deps: BTreeSet::new(),
        }
    }

    fn sample_inputs() -> BTreeMap<String, ParamValue> {
        BTreeMap::from([(
            "sample".to_string(),
            ParamValue::Str("P-0001-T".to_string()),
        )])
    }

    #[test]
    fn test_execute_instance_creates_work_dir_per_index() {
        let dir = tempdir().unwrap();
        let inst = instance("echo $(inputs.sample)", Vec::new());

        let outputs = execute_instance(&inst, &sample_inputs(), dir.path()).unwrap();
        assert!(outputs.is_empty());
        assert!(dir.path().join("call_variants/1").is_dir());
    }

    #[test]
    fn test_execute_instance_collects_declared_output() {
        let dir = tempdir().unwrap();
        let inst = instance(
            "echo content > $(inputs.sample).vcf",
            vec![ToolOutput {
                name: "vcf".to_string(),
                ty: ParamType::File,
                path: "$(inputs.sample).vcf".to_string(),
                secondary: Vec::new(),
            }],
        );

        let outputs = execute_instance(&inst, &sample_inputs(), dir.path()).unwrap();
        match &outputs["vcf"] {
            ParamValue::File(f) => {
                assert!(f.path.ends_with("call_variants/1/P-0001-T.vcf"));
                assert!(f.path.exists());
            }
            other => panic!("expected file, got {:?}", other),
        }
    }

    #[test]
    fn test_nonzero_exit_is_step_execution_error() {
        let dir = tempdir().unwrap();
        let inst = instance("exit 3", Vec::new());

        let err = execute_instance(&inst, &sample_inputs(), dir.path()).unwrap_err();
        match err {
            ExecutionError::StepExecution { instance, detail } => {
                assert_eq!(instance, "call_variants[1]");
                assert!(detail.contains("3"));
            }
            other => panic!("expected step execution error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_declared_output_fails() {
        let dir = tempdir().unwrap();
        let inst = instance(
            "true",
            vec![ToolOutput {
                name: "vcf".to_string(),
                ty: ParamType::File,
                path: "never-written.vcf".to_string(),
                secondary: Vec::new(),
            }],
        );

        let err = execute_instance(&inst, &sample_inputs(), dir.path()).unwrap_err();
        match err {
            ExecutionError::StepExecution { detail, .. } => {
                assert!(detail.contains("never-written.vcf"));
            }
            other => panic!("expected step execution error, got {:?}", other),
        }
    }

    #[test]
    fn test_secondary_files_verified_and_attached() {
        let dir = tempdir().unwrap();
        let inst = instance(
            "touch out.bam out.bai",
            vec![ToolOutput {
                name: "bam".to_string(),
                ty: ParamType::File,
                path: "out.bam".to_string(),
                secondary: vec![SecondaryFileRule("^.bai".to_string())],
            }],
        );

        let outputs = execute_instance(&inst, &sample_inputs(), dir.path()).unwrap();
        match &outputs["bam"] {
            ParamValue::File(f) => {
                assert_eq!(f.secondary.len(), 1);
                assert!(f.secondary[0].ends_with("out.bai"));
            }
            other => panic!("expected file, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_secondary_file_fails() {
        let dir = tempdir().unwrap();
        let inst = instance(
            "touch out.bam",
            vec![ToolOutput {
                name: "bam".to_string(),
                ty: ParamType::File,
                path: "out.bam".to_string(),
                secondary: vec![SecondaryFileRule("^.bai".to_string())],
            }],
        );

        let err = execute_instance(&inst, &sample_inputs(), dir.path()).unwrap_err();
        match err {
            ExecutionError::StepExecution { detail, .. } => {
                assert!(detail.contains("out.bai"));
            }
            other => panic!("expected step execution error, got {:?}", other),
        }
    }

    #[test]
    fn test_command_template_error_names_instance() {
        let dir = tempdir().unwrap();
        let inst = instance("echo $(inputs.missing)", Vec::new());

        let err = execute_instance(&inst, &sample_inputs(), dir.path()).unwrap_err();
        match err {
            ExecutionError::StepExecution { instance, detail } => {
                assert_eq!(instance, "call_variants[1]");
                assert!(detail.contains("missing"));
            }
            other => panic!("expected step execution error, got {:?}", other),
        }
    }
}
