//! Run State Persistence
//!
//! Records which plan instances have completed so an interrupted run can
//! resume without repeating finished work. State is written to
//! `.pipegraph/{pipeline_stem}.state` after every instance completion.
//!
//! Because a resolved plan is deterministic for a given definition and
//! parameter set, instance ids are stable across runs and safe to match
//! against a saved state.

use std::collections::BTreeSet;
use std::error::Error;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

const STATE_DIR: &str = ".pipegraph";

/// Persistent state for one pipeline run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RunState {
    /// Path to the pipeline definition this state belongs to.
    pub pipeline_path: String,

    /// Instance ids (e.g. `call_variants[2]`) that completed.
    pub completed: BTreeSet<String>,

    /// Instance ids that failed in the previous run.
    pub failed: BTreeSet<String>,

    /// Last time the state was updated.
    pub timestamp: DateTime<Utc>,
}

impl RunState {
    pub fn new(pipeline_path: &str) -> Self {
        Self {
            pipeline_path: pipeline_path.to_string(),
            completed: BTreeSet::new(),
            failed: BTreeSet::new(),
            timestamp: Utc::now(),
        }
    }

    /// Saves the state under [`STATE_DIR`] in the current directory.
    pub fn save(&self) -> Result<(), Box<dyn Error>> {
        fs::create_dir_all(STATE_DIR)?;

        let state_file = self.state_file_path();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&state_file, json)?;

        info!("saved run state to {}", state_file);
        Ok(())
    }

    /// Loads the saved state for a pipeline, if one exists.
    pub fn load(pipeline_path: &str) -> Result<Self, Box<dyn Error>> {
        let state_file = Self::state_file_path_for(pipeline_path);

        let content = fs::read_to_string(&state_file)?;
        let state: RunState = serde_json::from_str(&content)?;

        info!("loaded run state from {}", state_file);
        info!("previously completed: {} instances", state.completed.len());

        Ok(state)
    }

    fn state_file_path(&self) -> String {
        Self::state_file_path_for(&self.pipeline_path)
    }

    fn state_file_path_for(pipeline_path: &str) -> String {
        let stem = Path::new(pipeline_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("pipeline");

        format!("{}/{}.state", STATE_DIR, stem)
    }

    /// Marks an instance as completed, clearing any earlier failure.
    pub fn mark_completed(&mut self, instance: &str) {
        self.completed.insert(instance.to_string());
        self.failed.remove(instance);
        self.timestamp = Utc::now();
    }

    pub fn mark_failed(&mut self, instance: &str) {
        self.failed.insert(instance.to_string());
        self.timestamp = Utc::now();
    }

    pub fn is_completed(&self, instance: &str) -> bool {
        self.completed.contains(instance)
    }

    /// Returns true if this state carries progress from a previous run.
    pub fn is_resume(&self) -> bool {
        !self.completed.is_empty() || !self.failed.is_empty()
    }

    pub fn clear(&mut self) {
        self.completed.clear();
        self.failed.clear();
        self.timestamp = Utc::now();
    }

    /// Deletes the state file, if present.
    pub fn delete(&self) -> Result<(), Box<dyn Error>> {
        let state_file = self.state_file_path();
        if Path::new(&state_file).exists() {
            fs::remove_file(&state_file)?;
            info!("deleted state file: {}", state_file);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_state_creation() {
        let state = RunState::new("pipeline.yaml");
        assert_eq!(state.pipeline_path, "pipeline.yaml");
        assert!(state.completed.is_empty());
        assert!(!state.is_resume());
    }

    #[test]
    fn test_mark_completed_tracks_scatter_instances() {
        let mut state = RunState::new("pipeline.yaml");
        state.mark_completed("call_variants[0]");
        state.mark_completed("call_variants[1]");

        assert!(state.is_completed("call_variants[0]"));
        assert!(!state.is_completed("call_variants[2]"));
        assert!(state.is_resume());
    }

    #[test]
    fn test_completion_clears_failure() {
        let mut state = RunState::new("pipeline.yaml");
        state.mark_failed("annotate[2]");
        assert!(state.is_resume());

        state.mark_completed("annotate[2]");
        assert!(state.failed.is_empty());
        assert!(state.is_completed("annotate[2]"));
    }

    #[test]
    fn test_multiple_failures_recorded() {
        let mut state = RunState::new("pipeline.yaml");
        state.mark_failed("call_variants[1]");
        state.mark_failed("call_variants[3]");

        assert_eq!(state.failed.len(), 2);
    }

    #[test]
    fn test_state_serialization_roundtrip() {
        let mut state = RunState::new("roundtrip.yaml");
        state.mark_completed("align");
        state.mark_completed("module_1.dedup");

        let json = serde_json::to_string_pretty(&state).unwrap();
        let loaded: RunState = serde_json::from_str(&json).unwrap();

        assert_eq!(loaded.completed.len(), 2);
        assert!(loaded.is_completed("module_1.dedup"));
        assert_eq!(loaded.pipeline_path, "roundtrip.yaml");
    }

    #[test]
    fn test_state_file_write_and_read_back() {
        let temp_dir = tempdir().unwrap();
        let state_dir = temp_dir.path().join(STATE_DIR);

        let mut state = RunState::new("test_save.yaml");
        state.mark_completed("align");

        fs::create_dir_all(&state_dir).unwrap();
        let state_file = state_dir.join("test_save.state");
        let json = serde_json::to_string_pretty(&state).unwrap();
        fs::write(&state_file, &json).unwrap();

        let content = fs::read_to_string(&state_file).unwrap();
        let loaded: RunState = serde_json::from_str(&content).unwrap();
        assert!(loaded.is_completed("align"));
    }

    #[test]
    fn test_state_clear() {
        let mut state = RunState::new("pipeline.yaml");
        state.mark_completed("align");
        state.mark_failed("call_variants[0]");

        state.clear();

        assert!(state.completed.is_empty());
        assert!(state.failed.is_empty());
        assert!(!state.is_resume());
    }

    #[test]
    fn test_state_load_nonexistent() {
        let result = RunState::load("/nonexistent/path/pipeline.yaml");
        assert!(result.is_err());
    }

    #[test]
    fn test_state_delete_nonexistent() {
        let state = RunState::new("/nonexistent/pipeline.yaml");
        let result = state.delete();
        assert!(result.is_ok());
    }
}
