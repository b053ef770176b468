use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

// --- Task ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    New,
    InProgress,
    QaPending,
    NeedsFixes,
    Completed,
    Failed,
    Blocked,
    Deferred,
}

impl TaskStatus {
    /// Validates whether a transition from this status to `to` is allowed,
    /// per the task status machine.
    ///
    /// - NEW -> IN_PROGRESS -> QA_PENDING -> {COMPLETED, NEEDS_FIXES}
    /// - NEEDS_FIXES -> IN_PROGRESS
    /// - Any -> FAILED (terminal for this attempt)
    /// - Any -> BLOCKED, BLOCKED -> NEW
    /// - NEW / QA_PENDING -> DEFERRED, DEFERRED -> prior status
    /// - COMPLETED never leaves COMPLETED
    pub fn is_valid_transition(&self, to: &TaskStatus) -> bool {
        use TaskStatus::*;

        if *self == Completed {
            return false;
        }

        if *to == Failed && *self != Failed {
            return true;
        }

        if *to == Blocked && *self != Blocked {
            return true;
        }
        if *self == Blocked && *to == New {
            return true;
        }

        if *to == Deferred && matches!(self, New | QaPending) {
            return true;
        }
        if *self == Deferred {
            // Returning from deferral is validated against the caller-supplied
            // prior status by the State Store, not here — any forward target
            // is structurally allowed.
            return matches!(to, New | QaPending | InProgress);
        }

        matches!(
            (self, to),
            (New, InProgress)
                | (InProgress, QaPending)
                | (QaPending, Completed)
                | (QaPending, NeedsFixes)
                | (NeedsFixes, InProgress)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TaskError {
    pub kind: String,
    pub details: String,
    pub phase: String,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_file: Option<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub errors: Vec<TaskError>,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    pub created: String,
    pub updated: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>, now: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            target_file: None,
            status: TaskStatus::New,
            priority: 0,
            attempts: 0,
            failure_count: 0,
            errors: Vec::new(),
            depends_on: BTreeSet::new(),
            created: now.to_string(),
            updated: now.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    /// `attempts >= failure_count >= 0` must hold after every mutation.
    pub fn invariant_holds(&self) -> bool {
        self.attempts >= self.failure_count
    }
}

// --- PhaseState ---

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RunRecord {
    pub timestamp: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub files_created: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
}

/// Bound on `PhaseState::run_history`. Distinct from `run_count`, which is an
/// unbounded cumulative counter — the two must never be confused.
pub const RUN_HISTORY_CAP: usize = 20;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PhaseState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<String>,
    #[serde(default)]
    pub run_count: u32,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub failure_count: u32,
    /// Bounded list of recent runs, capped at `RUN_HISTORY_CAP`. Not the
    /// same field as `run_count`.
    #[serde(default)]
    pub run_history: Vec<RunRecord>,
}

impl PhaseState {
    /// Appends a run record, updating counters and the bounded history.
    /// No deduplication: recording the same record twice increments
    /// `run_count` by 2 and keeps both entries.
    pub fn record_run(&mut self, record: RunRecord) {
        self.last_run = Some(record.timestamp.clone());
        self.run_count += 1;
        if record.success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.run_history.push(record);
        if self.run_history.len() > RUN_HISTORY_CAP {
            let overflow = self.run_history.len() - RUN_HISTORY_CAP;
            self.run_history.drain(0..overflow);
        }
    }

    pub fn invariant_holds(&self) -> bool {
        self.run_count == self.success_count + self.failure_count
    }
}

// --- FileState ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    New,
    Modified,
    QaApproved,
    NeedsFixes,
    Deleted,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileState {
    pub path: String,
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_task: Option<String>,
    pub last_modified: String,
}

// --- Objective ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveLevel {
    Primary,
    Secondary,
    Tertiary,
}

impl ObjectiveLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectiveLevel::Primary => "primary",
            ObjectiveLevel::Secondary => "secondary",
            ObjectiveLevel::Tertiary => "tertiary",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    Proposed,
    Approved,
    Active,
    InProgress,
    Blocked,
    Completed,
    Documented,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Objective {
    pub id: String,
    pub level: ObjectiveLevel,
    pub title: String,
    pub description: String,
    pub status: ObjectiveStatus,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub completion_percentage: f64,
    #[serde(default)]
    pub open_issues: Vec<String>,
    #[serde(default)]
    pub critical_issues: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub blocks: Vec<String>,
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub failure_count: u32,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl Objective {
    /// `completion_percentage` in [0, 100]; equals completed/total * 100 when
    /// `task_statuses` is non-empty, following the invariant in the data
    /// model.
    pub fn recompute_completion(&mut self, task_statuses: &[TaskStatus]) {
        if task_statuses.is_empty() {
            return;
        }
        let completed = task_statuses
            .iter()
            .filter(|s| **s == TaskStatus::Completed)
            .count();
        self.completion_percentage = (completed as f64 / task_statuses.len() as f64) * 100.0;
    }
}

// --- Message ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Critical,
    High,
    Normal,
    Low,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    TaskCreated,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskBlocked,
    IssueFound,
    IssueAssigned,
    IssueInProgress,
    IssueResolved,
    IssueVerified,
    IssueClosed,
    IssueReopened,
    ObjectiveActivated,
    ObjectiveBlocked,
    ObjectiveDegrading,
    ObjectiveCritical,
    ObjectiveCompleted,
    ObjectiveDocumented,
    PhaseTransition,
    PhaseStarted,
    PhaseCompleted,
    PhaseError,
    PhaseRequest,
    PhaseResponse,
    PhaseTimeout,
    SystemAlert,
    SystemWarning,
    SystemInfo,
    HealthCheck,
    HealthDegraded,
    HealthRecovered,
    FileCreated,
    FileModified,
    FileDeleted,
    FileQaPassed,
    FileQaFailed,
    PredictionGenerated,
    AnomalyDetected,
    TrendIdentified,
    MetricUpdated,
}

/// A message recipient: either a specific phase name, or every subscriber.
pub const BROADCAST: &str = "*";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: String,
    pub timestamp: String,
    pub sender: String,
    pub recipient: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub priority: MessagePriority,
    #[serde(default)]
    pub payload: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default)]
    pub requires_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Message {
    pub fn is_broadcast(&self) -> bool {
        self.recipient == BROADCAST
    }
}

// --- ConversationThread ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationMessage {
    pub role: ConversationRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<serde_json::Value>,
    pub timestamp: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationBounds {
    pub max_messages: usize,
    pub max_tokens: usize,
    pub preserved_recent: usize,
    pub preserved_system: usize,
    /// Maximum message age, in seconds, before it becomes eligible for
    /// pruning regardless of position.
    pub max_age_seconds: i64,
}

impl Default for ConversationBounds {
    fn default() -> Self {
        Self {
            max_messages: 100,
            max_tokens: 32_000,
            preserved_recent: 10,
            preserved_system: 1,
            max_age_seconds: 3600,
        }
    }
}

impl ConversationBounds {
    /// Refactoring is configured with a much larger window: a lower bound
    /// previously caused the assistant to lose its prior attempt and retry
    /// the same failing action indefinitely.
    pub fn for_refactoring() -> Self {
        Self {
            max_messages: 500,
            max_tokens: 1_000_000,
            preserved_recent: 100,
            preserved_system: 1,
            max_age_seconds: 24 * 3600,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationThread {
    pub id: String,
    pub messages: Vec<ConversationMessage>,
    pub token_estimate: usize,
    pub bounds: ConversationBounds,
}

// --- PipelineState ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectMaturity {
    Foundation,
    Integration,
    Consolidation,
    Completion,
}

impl ProjectMaturity {
    /// Derives maturity from a completion percentage per the bands in the
    /// lifecycle-gating rule: [0,25) foundation, [25,50) integration,
    /// [50,75) consolidation, [75,100] completion.
    pub fn from_completion_percentage(pct: f64) -> Self {
        if pct < 25.0 {
            ProjectMaturity::Foundation
        } else if pct < 50.0 {
            ProjectMaturity::Integration
        } else if pct < 75.0 {
            ProjectMaturity::Consolidation
        } else {
            ProjectMaturity::Completion
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PipelineState {
    pub version: u64,
    #[serde(default)]
    pub updated: String,
    #[serde(default)]
    pub pipeline_run_id: String,
    #[serde(default)]
    pub tasks: BTreeMap<String, Task>,
    #[serde(default)]
    pub files: BTreeMap<String, FileState>,
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseState>,
    /// Keyed by level (`"primary" | "secondary" | "tertiary"`) then id.
    #[serde(default)]
    pub objectives: BTreeMap<String, BTreeMap<String, Objective>>,
    #[serde(default)]
    pub queue: Vec<String>,
    #[serde(default)]
    pub phase_history: Vec<String>,
    #[serde(default)]
    pub expansion_count: u32,
    #[serde(default)]
    pub no_update_counts: BTreeMap<String, u32>,
    #[serde(default)]
    pub phase_execution_counts: BTreeMap<String, u32>,
    #[serde(default)]
    pub performance_metrics: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub learned_patterns: Vec<serde_json::Value>,
    #[serde(default)]
    pub fix_history: Vec<serde_json::Value>,
    #[serde(default)]
    pub correlations: Vec<serde_json::Value>,
}

impl PipelineState {
    /// Derived from `tasks`: percentage of tasks in COMPLETED status.
    pub fn completion_percentage(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        let completed = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        (completed as f64 / self.tasks.len() as f64) * 100.0
    }

    pub fn project_maturity(&self) -> ProjectMaturity {
        ProjectMaturity::from_completion_percentage(self.completion_percentage())
    }

    /// Every task id referenced by any Objective must exist in `tasks`.
    pub fn objective_task_refs_valid(&self) -> bool {
        self.objectives.values().all(|by_id| {
            by_id
                .values()
                .all(|o| o.tasks.iter().all(|id| self.tasks.contains_key(id)))
        })
    }

    /// Every phase's run_count must equal success_count + failure_count.
    pub fn phase_counters_valid(&self) -> bool {
        self.phases.values().all(|p| p.invariant_holds())
    }
}
