use std::fs;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::errors::OrchestratorError;
use crate::types::{PipelineState, Task, TaskStatus};

pub const CURRENT_SCHEMA_VERSION: u64 = 1;

/// Durable, single-writer home for `PipelineState`. All writes go through
/// `persist`; nothing outside this module serializes the state document.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Loads the state document, or returns a fresh `PipelineState` with a
    /// new `pipeline_run_id` if the file does not exist yet.
    ///
    /// Schema and invariant failures come back as `OrchestratorError::StateCorruption`
    /// — the one variant `is_fatal()` recognizes — so the coordinator's outer
    /// loop can tell a corrupt document from an ordinary I/O hiccup and halt
    /// instead of retrying forever against the same bad file.
    pub fn load(&self) -> Result<PipelineState, OrchestratorError> {
        if !self.path.exists() {
            let mut state = PipelineState::default();
            state.pipeline_run_id = uuid::Uuid::new_v4().to_string();
            return Ok(state);
        }

        let contents = fs::read_to_string(&self.path)?;

        let state: PipelineState = serde_json::from_str(&contents).map_err(|e| {
            OrchestratorError::StateCorruption(format!("{}: {}", self.path.display(), e))
        })?;

        if !state.objective_task_refs_valid() {
            return Err(OrchestratorError::StateCorruption(format!(
                "{}: an Objective references a task id absent from state.tasks",
                self.path.display()
            )));
        }
        if !state.phase_counters_valid() {
            return Err(OrchestratorError::StateCorruption(format!(
                "{}: PhaseState.run_count != success_count + failure_count",
                self.path.display()
            )));
        }

        Ok(state)
    }

    /// Serializes `state`, bumps `version`, and writes it via the
    /// write-temp-then-rename pattern: a crash between the temp write and
    /// the rename leaves the previous document on disk untouched, and the
    /// unpersisted temp file is removed automatically on drop.
    pub fn persist(&self, state: &mut PipelineState) -> Result<(), OrchestratorError> {
        let parent = self.path.parent().ok_or_else(|| {
            OrchestratorError::Config(format!("cannot determine parent directory of {}", self.path.display()))
        })?;

        fs::create_dir_all(parent)?;

        state.version += 1;
        state.updated = chrono::Utc::now().to_rfc3339();

        let json = serde_json::to_string_pretty(state)?;

        let temp_file = NamedTempFile::new_in(parent)?;
        fs::write(temp_file.path(), &json)?;

        let file = fs::File::open(temp_file.path())?;
        file.sync_all()?;

        temp_file
            .persist(&self.path)
            .map_err(|e| OrchestratorError::Io(e.error))?;

        Ok(())
    }
}

/// Transition a task's status, validating the transition against the task
/// status machine. Marking an already-COMPLETED task COMPLETED again is a
/// no-op — callers should check for that before calling `persist` so the
/// version is not bumped.
pub fn transition_task_status(task: &mut Task, new_status: TaskStatus) -> Result<bool, OrchestratorError> {
    if task.status == new_status {
        return Ok(false);
    }
    if !task.status.is_valid_transition(&new_status) {
        return Err(OrchestratorError::InvariantViolation(format!(
            "invalid status transition for {}: {:?} -> {:?}",
            task.id, task.status, new_status
        )));
    }
    task.status = new_status;
    task.updated = chrono::Utc::now().to_rfc3339();
    Ok(true)
}

/// Directory containing the state document, used by callers that need to
/// co-locate the single-instance lock or strategic documents.
pub fn state_dir(state_path: &Path) -> &Path {
    state_path.parent().unwrap_or_else(|| Path::new("."))
}
