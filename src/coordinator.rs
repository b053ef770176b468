use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bus::MessageBusHandle;
use crate::config::{LifecycleConfig, OrchestratorConfig};
use crate::llm::LlmClient;
use crate::loop_detector::{Fingerprint, Intervention, LoopDetector, RecordedAction};
use crate::{log_error, log_info};
use crate::objectives::{ActionRecommendation, ObjectiveManager};
use crate::phase::{run_phase_loop, PhaseContext, PhaseResult};
use crate::phases;
use crate::store::{transition_task_status, StateStore};
use crate::tools::ToolRegistry;
use crate::types::{ConversationBounds, ConversationThread, Objective, PipelineState, ProjectMaturity, Task, TaskStatus};

/// What the selector chose for this iteration, and why — `reason` exists
/// purely for logging/diagnostics, never branched on.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub phase: String,
    pub task_id: Option<String>,
    pub reason: String,
    pub terminate: bool,
}

impl Decision {
    fn phase(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            phase: name.into(),
            task_id: None,
            reason: reason.into(),
            terminate: false,
        }
    }

    fn for_task(name: impl Into<String>, task: &Task, reason: impl Into<String>) -> Self {
        Self {
            phase: name.into(),
            task_id: Some(task.id.clone()),
            reason: reason.into(),
            terminate: false,
        }
    }

    fn terminate(reason: impl Into<String>) -> Self {
        Self {
            phase: String::new(),
            task_id: None,
            reason: reason.into(),
            terminate: true,
        }
    }
}

/// The tactical/strategic two-layer selector (spec §4.2). Pure and
/// synchronously testable, mirroring the scheduler's `select_actions`: no
/// I/O, no clock reads, same inputs always produce the same decision.
///
/// Tactical layer, in priority order:
///   1. a NEEDS_FIXES task exists        -> debugging
///   2. a QA_PENDING task exists         -> qa, subject to lifecycle gating
///   3. a NEW/IN_PROGRESS task exists    -> coding
///   4. no tasks exist yet               -> planning
///   5. every task is COMPLETED          -> documentation -> project_planning -> terminate
///
/// Strategic layer: the active objective's own priority chain (spec §4.4,
/// `ObjectiveManager::recommend_action`) — blocked, then critical/open
/// issues, then debugging, then QA/coding/documentation — can override the
/// tactical pick, except debugging driven by an actual NEEDS_FIXES task,
/// which always wins (a task already known to need fixing takes priority
/// over strategic diagnosis).
pub fn decide_next_action(
    state: &PipelineState,
    objectives: &ObjectiveManager,
    lifecycle: &LifecycleConfig,
) -> Decision {
    let tactical = tactical_decision(state, lifecycle);
    if tactical.phase == "debugging" {
        return tactical;
    }

    if let Some(objective) = objectives.active_objective() {
        let task_statuses = objective_task_statuses(state, objective);
        match objectives.recommend_action(objective, &task_statuses) {
            ActionRecommendation::ProjectPlanning => {
                return Decision::phase(
                    "project_planning",
                    format!("objective {} is blocked on an unmet dependency", objective.id),
                );
            }
            ActionRecommendation::Investigation => {
                return Decision::phase(
                    "investigation",
                    format!("objective {} health is critical", objective.id),
                );
            }
            ActionRecommendation::Debugging => {
                return Decision::phase(
                    "debugging",
                    format!("objective {} has unresolved critical or open issues", objective.id),
                );
            }
            // Qa / Coding / Documentation / Planning: the tactical layer's
            // own lifecycle-aware gating (QA maturity bands, priority
            // ordering across all tasks, not just this objective's) already
            // covers these more precisely than a single objective's view.
            ActionRecommendation::Qa
            | ActionRecommendation::Coding
            | ActionRecommendation::Documentation
            | ActionRecommendation::Planning => {}
        }
    }

    tactical
}

/// The task statuses `recommend_action` reasons over: the objective's own
/// tasks when it has any recorded, else the whole pipeline's (an objective
/// fresh out of markdown parsing has no `tasks` yet).
fn objective_task_statuses(state: &PipelineState, objective: &Objective) -> Vec<TaskStatus> {
    if objective.tasks.is_empty() {
        state.tasks.values().map(|t| t.status).collect()
    } else {
        objective
            .tasks
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .map(|t| t.status)
            .collect()
    }
}

fn tactical_decision(state: &crate::types::PipelineState, lifecycle: &LifecycleConfig) -> Decision {
    if let Some(task) = highest_priority(state, &[TaskStatus::NeedsFixes]) {
        return Decision::for_task("debugging", task, "task awaiting fixes");
    }

    let qa_pending = tasks_with_status(state, TaskStatus::QaPending);
    if !qa_pending.is_empty() {
        let maturity = state.project_maturity();
        if qa_threshold_met(maturity, qa_pending.len(), lifecycle) {
            let task = qa_pending[0];
            return Decision::for_task("qa", task, format!("{:?} lifecycle QA threshold met", maturity));
        }
    }

    if let Some(task) = highest_priority(state, &[TaskStatus::New, TaskStatus::InProgress]) {
        return Decision::for_task("coding", task, "task ready for implementation");
    }

    if state.tasks.is_empty() {
        return Decision::phase("planning", "no tasks exist yet");
    }

    if state.tasks.values().all(|t| t.status == TaskStatus::Completed) {
        return match state.phase_history.last().map(String::as_str) {
            Some("documentation") => Decision::phase("project_planning", "documentation recorded; reassessing objectives"),
            Some("project_planning") => Decision::terminate("all tasks completed, documented, and reassessed"),
            _ => Decision::phase("documentation", "all tasks completed; recording outcomes"),
        };
    }

    // Every task is in a status this layer doesn't act on directly (FAILED,
    // BLOCKED, DEFERRED) — fall back to planning so a human-authored update
    // to the plan can unblock them.
    Decision::phase("planning", "no actionable task status found")
}

/// QA routing loosens as the project matures (spec §4.2): a trickle of
/// QA_PENDING tasks early on should not starve coding, but late in the
/// project even a single pending review should be cleared promptly.
fn qa_threshold_met(maturity: ProjectMaturity, qa_pending_count: usize, lifecycle: &LifecycleConfig) -> bool {
    match maturity {
        ProjectMaturity::Foundation => false,
        ProjectMaturity::Integration => qa_pending_count >= lifecycle.integration_qa_threshold as usize,
        ProjectMaturity::Consolidation => qa_pending_count >= lifecycle.consolidation_qa_threshold as usize,
        ProjectMaturity::Completion => true,
    }
}

fn tasks_with_status(state: &crate::types::PipelineState, status: TaskStatus) -> Vec<&Task> {
    let mut tasks: Vec<&Task> = state.tasks.values().filter(|t| t.status == status).collect();
    tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    tasks
}

fn highest_priority<'a>(state: &'a crate::types::PipelineState, statuses: &[TaskStatus]) -> Option<&'a Task> {
    let mut tasks: Vec<&Task> = state
        .tasks
        .values()
        .filter(|t| statuses.contains(&t.status))
        .collect();
    tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    tasks.into_iter().next()
}

/// Specialized on-demand triggers (spec §4.2/§4.11): bypass normal selection
/// entirely when a phase reports a capability gap, when an investigation
/// recommends a specific specialist, or when a task has racked up repeated
/// failures. Checked before `decide_next_action` on every iteration.
pub fn specialized_trigger(
    state: &crate::types::PipelineState,
    last_result: Option<&PhaseResult>,
) -> Option<Decision> {
    if let Some(result) = last_result {
        if let Some(name) = result.data.get("recommend_specialist").and_then(|v| v.as_str()) {
            if phases::find_phase(name).is_some() {
                return Some(Decision::phase(name.to_string(), "a phase recommended a specialist consultation"));
            }
        }

        if result.data.get("missing_capability").and_then(|v| v.as_bool()).unwrap_or(false) {
            let kind = result.data.get("missing_capability_kind").and_then(|v| v.as_str()).unwrap_or("");
            let phase = match kind {
                "prompt" => "prompt_design",
                "role" => "role_design",
                "tool" => "tool_design",
                _ => "application_troubleshooting",
            };
            return Some(Decision::phase(phase, "a phase reported a missing capability"));
        }
    }

    state
        .tasks
        .values()
        .filter(|t| t.failure_count >= 3 && !t.status.is_terminal())
        .min_by_key(|t| t.id.clone())
        .map(|t| Decision::for_task("application_troubleshooting", t, "task has failed 3 or more times"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    ShutdownRequested,
    CapReached,
    PipelineComplete,
    AskUser,
    CircuitBreakerTripped,
    StateCorrupted,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub iterations: u32,
    pub halt_reason: HaltReason,
    pub tasks_completed: u32,
}

/// Consecutive phase failures before the outer loop halts rather than
/// continuing to burn phase executions against a wedged pipeline.
const CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

/// Everything the outer loop needs, bundled so `run` takes one argument. The
/// coordinator owns the sole in-process `StateStore` writer (spec §5); two
/// coordinators over the same state path must be kept apart by `lock.rs`,
/// not by this struct.
pub struct Coordinator {
    pub store: StateStore,
    pub bus: MessageBusHandle,
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<ToolRegistry>,
    pub objectives: ObjectiveManager,
    pub loop_detector: LoopDetector,
    pub config: OrchestratorConfig,
}

impl Coordinator {
    pub fn new(
        store: StateStore,
        bus: MessageBusHandle,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolRegistry>,
        objectives: ObjectiveManager,
        config: OrchestratorConfig,
    ) -> Self {
        let loop_detector = LoopDetector::new(config.loop_detector.clone());
        Self {
            store,
            bus,
            llm,
            tools,
            objectives,
            loop_detector,
            config,
        }
    }

    /// The outer Think/Dispatch/Record loop (spec §9), run until cancelled,
    /// capped, terminated by the selector, or escalated to ASK_USER.
    pub async fn run(&mut self, cancel: CancellationToken, cap: Option<u32>) -> Result<RunSummary, String> {
        let mut iterations = 0u32;
        let mut consecutive_failures = 0u32;
        let mut forced: Option<Decision> = None;
        let mut threads: HashMap<String, ConversationThread> = HashMap::new();
        let mut last_result: Option<PhaseResult> = None;

        log_info!("Coordinator started (cap={:?}).", cap);

        loop {
            if cancel.is_cancelled() {
                return Ok(self.summary(iterations, HaltReason::ShutdownRequested));
            }
            if let Some(limit) = cap {
                if iterations >= limit {
                    return Ok(self.summary(iterations, HaltReason::CapReached));
                }
            }
            if consecutive_failures >= CIRCUIT_BREAKER_THRESHOLD {
                return Ok(self.summary(iterations, HaltReason::CircuitBreakerTripped));
            }

            let mut state = match self.store.load() {
                Ok(state) => state,
                Err(e) if e.is_fatal() => {
                    log_error!("state document is unrecoverable, halting: {}", e);
                    return Ok(self.summary(iterations, HaltReason::StateCorrupted));
                }
                Err(e) => return Err(e.into()),
            };
            self.objectives.merge_from_state(&state);

            let decision = forced
                .take()
                .or_else(|| specialized_trigger(&state, last_result.as_ref()))
                .unwrap_or_else(|| decide_next_action(&state, &self.objectives, &self.config.lifecycle));

            if decision.terminate {
                return Ok(self.summary(iterations, HaltReason::PipelineComplete));
            }

            let Some(spec) = phases::find_phase(&decision.phase) else {
                log_info!("[coordinator] unknown phase '{}', treating as planning", decision.phase);
                forced = Some(Decision::phase("planning", "fallback: unrecognized phase name"));
                continue;
            };

            let task = decision.task_id.as_ref().and_then(|id| state.tasks.get(id)).cloned();
            let objective_context = self.objective_context(spec.name);
            let thread_key = format!("{}:{}", spec.name, decision.task_id.as_deref().unwrap_or("_"));
            let bounds = if spec.name == "refactoring" {
                ConversationBounds::for_refactoring()
            } else {
                ConversationBounds::default()
            };
            let thread = threads
                .entry(thread_key)
                .or_insert_with(|| ConversationThread::new(spec.name, bounds));

            let ctx = PhaseContext {
                llm: self.llm.clone(),
                bus: self.bus.clone(),
                tools: self.tools.clone(),
                max_turns: self.config.execution.max_turns,
                context_length: self.config.agent.context_length,
                model: self.config.agent.model.clone(),
            };

            let result = run_phase_loop(spec, &ctx, task.as_ref(), &objective_context, thread, &cancel).await;

            self.record_result(&mut state, spec.name, task.as_ref(), &result)?;
            match self.store.persist(&mut state) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    log_error!("state document is unrecoverable, halting: {}", e);
                    return Ok(self.summary(iterations, HaltReason::StateCorrupted));
                }
                Err(e) => return Err(e.into()),
            }

            if result.data["cancelled"] == serde_json::Value::Bool(true) {
                return Ok(self.summary(iterations, HaltReason::ShutdownRequested));
            }

            if result.success {
                consecutive_failures = 0;
            } else {
                consecutive_failures += 1;
            }

            let task_advanced = result.success;
            let failure_count = task.as_ref().map(|t| t.failure_count).unwrap_or(0);
            // Key the fingerprint on the actual last tool call this phase
            // execution dispatched, not the phase's overall outcome — two
            // calls to the same phase/task with different underlying tool
            // targets must not be conflated, and repeated identical calls
            // must be, even mid-phase.
            let fingerprint = match result.tool_invocations.last() {
                Some(invocation) => Fingerprint {
                    tool_name: invocation.tool_name.clone(),
                    primary_target: invocation.primary_target.clone(),
                    success: invocation.success,
                },
                None => Fingerprint {
                    tool_name: format!("{}:no_tool_call", spec.name),
                    primary_target: decision.task_id.clone().unwrap_or_else(|| "none".to_string()),
                    success: result.success,
                },
            };
            let action = RecordedAction {
                phase: spec.name.to_string(),
                task_id: decision.task_id.clone(),
                fingerprint,
            };
            match self.loop_detector.observe(action, failure_count, task_advanced) {
                Some(Intervention::ForceSpecialist) => {
                    forced = Some(Decision::phase(
                        "application_troubleshooting",
                        "loop detector forced a specialist consultation",
                    ));
                }
                Some(Intervention::ForceProjectPlanning) => {
                    forced = Some(Decision::phase(
                        "project_planning",
                        "loop detector forced a project-planning reassessment",
                    ));
                }
                Some(Intervention::AskUser) => {
                    return Ok(self.summary(iterations, HaltReason::AskUser));
                }
                None => {}
            }

            last_result = Some(result);
            iterations += 1;
        }
    }

    fn objective_context(&self, phase_name: &str) -> String {
        let levels = phases::objective_levels_for(phase_name);
        if levels.is_empty() {
            return String::new();
        }
        let mut lines = Vec::new();
        for level in levels {
            if let Some(by_id) = self.objectives.objectives.get(*level) {
                for objective in by_id.values() {
                    lines.push(format!("- [{}] {}: {}", level, objective.title, objective.description));
                }
            }
        }
        lines.join("\n")
    }

    fn record_result(
        &mut self,
        state: &mut crate::types::PipelineState,
        phase_name: &str,
        task: Option<&Task>,
        result: &PhaseResult,
    ) -> Result<(), String> {
        let now = chrono::Utc::now().to_rfc3339();

        let phase_state = state.phases.entry(phase_name.to_string()).or_default();
        phase_state.record_run(crate::types::RunRecord {
            timestamp: now.clone(),
            success: result.success,
            task_id: task.map(|t| t.id.clone()),
            files_created: result.files_created.clone(),
            files_modified: result.files_modified.clone(),
        });

        state.phase_history.push(phase_name.to_string());

        if let Some(task) = task {
            if let Some(mutable) = state.tasks.get_mut(&task.id) {
                mutable.attempts += 1;
                if !result.success {
                    mutable.failure_count += 1;
                    mutable.errors.push(crate::types::TaskError {
                        kind: "phase_failure".to_string(),
                        details: result.message.clone(),
                        phase: phase_name.to_string(),
                        timestamp: now,
                    });
                }

                let next = match (phase_name, result.success) {
                    ("coding", true) => Some(TaskStatus::QaPending),
                    ("qa", true) => Some(TaskStatus::Completed),
                    ("qa", false) => Some(TaskStatus::NeedsFixes),
                    ("debugging", true) => Some(TaskStatus::InProgress),
                    _ => None,
                };

                if let Some(next_status) = next {
                    transition_task_status(mutable, next_status)?;
                }
            }
        }

        self.objectives.write_back(state);
        Ok(())
    }

    fn summary(&self, iterations: u32, halt_reason: HaltReason) -> RunSummary {
        RunSummary {
            iterations,
            halt_reason,
            tasks_completed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectives::ObjectiveManager;
    use crate::types::{ObjectiveLevel, ObjectiveStatus, PipelineState};

    fn task(id: &str, status: TaskStatus) -> Task {
        let mut t = Task::new(id, "desc", "2026-01-01T00:00:00Z");
        t.status = status;
        t
    }

    #[test]
    fn needs_fixes_beats_everything_else() {
        let mut state = PipelineState::default();
        state.tasks.insert("t1".into(), task("t1", TaskStatus::QaPending));
        state.tasks.insert("t2".into(), task("t2", TaskStatus::NeedsFixes));
        let objectives = ObjectiveManager::new();
        let decision = decide_next_action(&state, &objectives, &LifecycleConfig::default());
        assert_eq!(decision.phase, "debugging");
        assert_eq!(decision.task_id.as_deref(), Some("t2"));
    }

    #[test]
    fn premature_qa_is_deferred_to_coding_below_threshold() {
        let mut state = PipelineState::default();
        for i in 0..49 {
            state.tasks.insert(format!("done{i}"), task(&format!("done{i}"), TaskStatus::Completed));
        }
        for i in 0..3 {
            state.tasks.insert(format!("qa{i}"), task(&format!("qa{i}"), TaskStatus::QaPending));
        }
        state.tasks.insert("new1".into(), task("new1", TaskStatus::New));
        for i in 0..85 {
            state.tasks.insert(format!("pending{i}"), task(&format!("pending{i}"), TaskStatus::InProgress));
        }
        let objectives = ObjectiveManager::new();
        let decision = decide_next_action(&state, &objectives, &LifecycleConfig::default());
        assert_eq!(decision.phase, "coding");
    }

    #[test]
    fn qa_routes_once_integration_threshold_met() {
        let mut state = PipelineState::default();
        for i in 0..49 {
            state.tasks.insert(format!("done{i}"), task(&format!("done{i}"), TaskStatus::Completed));
        }
        for i in 0..5 {
            state.tasks.insert(format!("qa{i}"), task(&format!("qa{i}"), TaskStatus::QaPending));
        }
        for i in 0..84 {
            state.tasks.insert(format!("pending{i}"), task(&format!("pending{i}"), TaskStatus::InProgress));
        }
        let objectives = ObjectiveManager::new();
        let decision = decide_next_action(&state, &objectives, &LifecycleConfig::default());
        assert_eq!(decision.phase, "qa");
    }

    #[test]
    fn no_tasks_routes_to_planning() {
        let state = PipelineState::default();
        let objectives = ObjectiveManager::new();
        let decision = decide_next_action(&state, &objectives, &LifecycleConfig::default());
        assert_eq!(decision.phase, "planning");
    }

    #[test]
    fn all_completed_progresses_documentation_then_project_planning_then_terminates() {
        let mut state = PipelineState::default();
        state.tasks.insert("t1".into(), task("t1", TaskStatus::Completed));
        let objectives = ObjectiveManager::new();

        let first = decide_next_action(&state, &objectives, &LifecycleConfig::default());
        assert_eq!(first.phase, "documentation");

        state.phase_history.push("documentation".to_string());
        let second = decide_next_action(&state, &objectives, &LifecycleConfig::default());
        assert_eq!(second.phase, "project_planning");

        state.phase_history.push("project_planning".to_string());
        let third = decide_next_action(&state, &objectives, &LifecycleConfig::default());
        assert!(third.terminate);
    }

    #[test]
    fn critical_objective_health_overrides_to_investigation() {
        let mut state = PipelineState::default();
        state.tasks.insert("t1".into(), task("t1", TaskStatus::New));
        let mut objectives = ObjectiveManager::new();
        let mut objective = crate::types::Objective {
            id: "primary_001".into(),
            level: ObjectiveLevel::Primary,
            title: "x".into(),
            description: String::new(),
            status: ObjectiveStatus::Active,
            tasks: vec![],
            completion_percentage: 0.0,
            open_issues: vec![],
            critical_issues: vec![],
            depends_on: vec![],
            blocks: vec![],
            success_rate: 0.0,
            failure_count: 3,
            created_at: "2026-01-01T00:00:00Z".into(),
            started_at: None,
            completed_at: None,
            target_date: None,
            acceptance_criteria: vec![],
        };
        objective.failure_count = 3;
        objectives.objectives.entry("primary".into()).or_default().insert(objective.id.clone(), objective);

        let decision = decide_next_action(&state, &objectives, &LifecycleConfig::default());
        assert_eq!(decision.phase, "investigation");
    }

    #[test]
    fn debugging_is_never_overridden_by_strategic_layer() {
        let mut state = PipelineState::default();
        state.tasks.insert("t1".into(), task("t1", TaskStatus::NeedsFixes));
        let mut objectives = ObjectiveManager::new();
        let mut objective = crate::types::Objective {
            id: "primary_001".into(),
            level: ObjectiveLevel::Primary,
            title: "x".into(),
            description: String::new(),
            status: ObjectiveStatus::Active,
            tasks: vec![],
            completion_percentage: 0.0,
            open_issues: vec![],
            critical_issues: vec![],
            depends_on: vec![],
            blocks: vec![],
            success_rate: 0.0,
            failure_count: 5,
            created_at: "2026-01-01T00:00:00Z".into(),
            started_at: None,
            completed_at: None,
            target_date: None,
            acceptance_criteria: vec![],
        };
        objective.failure_count = 5;
        objectives.objectives.entry("primary".into()).or_default().insert(objective.id.clone(), objective);

        let decision = decide_next_action(&state, &objectives, &LifecycleConfig::default());
        assert_eq!(decision.phase, "debugging");
    }

    #[test]
    fn repeated_failure_count_triggers_specialized_path() {
        let mut state = PipelineState::default();
        let mut t = task("t1", TaskStatus::NeedsFixes);
        t.failure_count = 3;
        state.tasks.insert("t1".into(), t);
        let decision = specialized_trigger(&state, None).unwrap();
        assert_eq!(decision.phase, "application_troubleshooting");
        assert_eq!(decision.task_id.as_deref(), Some("t1"));
    }

    #[test]
    fn missing_capability_signal_routes_to_matching_specialist() {
        let state = PipelineState::default();
        let result = PhaseResult {
            success: false,
            message: "stuck".into(),
            next_phase: None,
            files_created: vec![],
            files_modified: vec![],
            data: serde_json::json!({ "missing_capability": true, "missing_capability_kind": "tool" }),
            tool_invocations: vec![],
        };
        let decision = specialized_trigger(&state, Some(&result)).unwrap();
        assert_eq!(decision.phase, "tool_design");
    }

    #[tokio::test]
    async fn corrupt_state_document_halts_gracefully_instead_of_erroring() {
        use crate::llm::MockLlmClient;

        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        std::fs::write(&state_path, "{ not valid json").unwrap();

        let store = StateStore::new(state_path);
        let bus = crate::bus::spawn_message_bus();
        let tools = Arc::new(ToolRegistry::new(dir.path()));
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new(vec![]));
        let objectives = ObjectiveManager::new();
        let config = OrchestratorConfig::default();
        let mut coordinator = Coordinator::new(store, bus, llm, tools, objectives, config);

        let cancel = CancellationToken::new();
        let summary = coordinator.run(cancel, Some(10)).await.unwrap();
        assert_eq!(summary.halt_reason, HaltReason::StateCorrupted);
        assert_eq!(summary.iterations, 0);
    }

    #[tokio::test]
    async fn end_to_end_smallest_pipeline_halts_at_cap() {
        use crate::llm::{ChatResponse, ChatResponseMessage, MockLlmClient};

        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let bus = crate::bus::spawn_message_bus();
        let tools = Arc::new(ToolRegistry::new(dir.path()));
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new(vec![ChatResponse {
            message: ChatResponseMessage {
                role: "assistant".into(),
                content: "planning complete for this cycle".into(),
                tool_calls: vec![],
            },
            done: true,
        }]));
        let objectives = ObjectiveManager::new();
        let config = OrchestratorConfig::default();
        let mut coordinator = Coordinator::new(store, bus, llm, tools, objectives, config);

        let cancel = CancellationToken::new();
        let summary = coordinator.run(cancel, Some(1)).await.unwrap();
        assert_eq!(summary.iterations, 1);
        assert_eq!(summary.halt_reason, HaltReason::CapReached);
    }
}
