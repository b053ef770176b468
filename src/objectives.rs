use std::collections::BTreeMap;

use crate::types::{Objective, ObjectiveLevel, ObjectiveStatus, PipelineState, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveHealth {
    Healthy,
    Degrading,
    Critical,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionRecommendation {
    Investigation,
    ProjectPlanning,
    Debugging,
    Qa,
    Coding,
    Documentation,
    Planning,
}

/// Owns the in-memory objective hierarchy. Objectives are parsed once from
/// markdown at startup with empty `tasks` lists; on every load the manager
/// merges `tasks` from persisted state — losing this merge manifests as
/// "0% completion despite N tasks existing".
pub struct ObjectiveManager {
    /// level -> id -> objective
    pub objectives: BTreeMap<String, BTreeMap<String, Objective>>,
}

impl ObjectiveManager {
    pub fn new() -> Self {
        Self {
            objectives: BTreeMap::new(),
        }
    }

    /// Parses objectives from the three strategic markdown documents.
    /// Ids are stable across runs (`<level>_<nnn>`); parsed objectives start
    /// with empty `tasks`.
    pub fn load_from_markdown(
        primary_md: &str,
        secondary_md: &str,
        tertiary_md: &str,
    ) -> Self {
        let mut manager = Self::new();
        manager.ingest_markdown(ObjectiveLevel::Primary, primary_md);
        manager.ingest_markdown(ObjectiveLevel::Secondary, secondary_md);
        manager.ingest_markdown(ObjectiveLevel::Tertiary, tertiary_md);
        manager
    }

    fn ingest_markdown(&mut self, level: ObjectiveLevel, markdown: &str) {
        let level_map = self.objectives.entry(level.as_str().to_string()).or_default();
        for (idx, heading) in markdown
            .lines()
            .filter_map(|line| line.strip_prefix("## "))
            .enumerate()
        {
            let id = format!("{}_{:03}", level.as_str(), idx + 1);
            let title = heading.trim().to_string();
            level_map.entry(id.clone()).or_insert_with(|| Objective {
                id,
                level,
                title,
                description: String::new(),
                status: ObjectiveStatus::Proposed,
                tasks: Vec::new(),
                completion_percentage: 0.0,
                open_issues: Vec::new(),
                critical_issues: Vec::new(),
                depends_on: Vec::new(),
                blocks: Vec::new(),
                success_rate: 0.0,
                failure_count: 0,
                created_at: chrono::Utc::now().to_rfc3339(),
                started_at: None,
                completed_at: None,
                target_date: None,
                acceptance_criteria: Vec::new(),
            });
        }
    }

    /// The safety-critical fix for the data-loss regression (spec §4.8):
    /// merges `state.objectives[level][id].tasks` into each in-memory
    /// Objective's `tasks` list, overwriting parsed (empty) lists.
    pub fn merge_from_state(&mut self, state: &PipelineState) {
        for (level, by_id) in &state.objectives {
            let level_map = self.objectives.entry(level.clone()).or_default();
            for (id, persisted) in by_id {
                let entry = level_map.entry(id.clone()).or_insert_with(|| persisted.clone());
                entry.tasks = persisted.tasks.clone();
                entry.completion_percentage = persisted.completion_percentage;
                entry.status = persisted.status;
                entry.open_issues = persisted.open_issues.clone();
                entry.critical_issues = persisted.critical_issues.clone();
                entry.success_rate = persisted.success_rate;
                entry.failure_count = persisted.failure_count;
            }
        }
    }

    /// Writes the current in-memory hierarchy back onto `state.objectives`
    /// so the merge survives the next persist.
    pub fn write_back(&self, state: &mut PipelineState) {
        state.objectives = self.objectives.clone();
    }

    /// Priority: blocking dependencies -> critical blocking issues ->
    /// consecutive failures >= 3 -> success rate < 0.5 -> healthy.
    pub fn health(&self, objective: &Objective) -> ObjectiveHealth {
        if objective.status == ObjectiveStatus::Blocked || !objective.depends_on.is_empty() && self.has_unmet_dependency(objective) {
            return ObjectiveHealth::Blocked;
        }
        if !objective.critical_issues.is_empty() {
            return ObjectiveHealth::Critical;
        }
        if objective.failure_count >= 3 {
            return ObjectiveHealth::Critical;
        }
        if objective.success_rate < 0.5 && objective.success_rate > 0.0 {
            return ObjectiveHealth::Degrading;
        }
        ObjectiveHealth::Healthy
    }

    fn has_unmet_dependency(&self, objective: &Objective) -> bool {
        objective.depends_on.iter().any(|dep_id| {
            self.objectives
                .values()
                .find_map(|by_id| by_id.get(dep_id))
                .map(|dep| dep.status != ObjectiveStatus::Completed)
                .unwrap_or(true)
        })
    }

    /// First ACTIVE, else first IN_PROGRESS (by level then id), else first
    /// APPROVED whose dependencies are all COMPLETED; else `None`.
    pub fn active_objective(&self) -> Option<&Objective> {
        let ordered = self.ordered_by_level_then_id();

        if let Some(o) = ordered.iter().find(|o| o.status == ObjectiveStatus::Active) {
            return Some(o);
        }
        if let Some(o) = ordered.iter().find(|o| o.status == ObjectiveStatus::InProgress) {
            return Some(o);
        }
        ordered
            .into_iter()
            .find(|o| o.status == ObjectiveStatus::Approved && !self.has_unmet_dependency(o))
    }

    fn ordered_by_level_then_id(&self) -> Vec<&Objective> {
        let mut all: Vec<&Objective> = self.objectives.values().flat_map(|m| m.values()).collect();
        all.sort_by(|a, b| a.level.cmp(&b.level).then(a.id.cmp(&b.id)));
        all
    }

    /// Health-based recommendations precede task-based ones, which precede
    /// completion-based ones.
    pub fn recommend_action(&self, objective: &Objective, task_statuses: &[TaskStatus]) -> ActionRecommendation {
        match self.health(objective) {
            ObjectiveHealth::Critical => return ActionRecommendation::Investigation,
            ObjectiveHealth::Blocked => return ActionRecommendation::ProjectPlanning,
            _ => {}
        }
        if !objective.critical_issues.is_empty() || !objective.open_issues.is_empty() {
            return ActionRecommendation::Debugging;
        }
        if task_statuses.iter().any(|s| *s == TaskStatus::NeedsFixes) {
            return ActionRecommendation::Debugging;
        }
        if task_statuses.iter().any(|s| *s == TaskStatus::QaPending) {
            return ActionRecommendation::Qa;
        }
        if task_statuses
            .iter()
            .any(|s| matches!(s, TaskStatus::New | TaskStatus::InProgress))
        {
            return ActionRecommendation::Coding;
        }
        if objective.completion_percentage >= 100.0 {
            return ActionRecommendation::Documentation;
        }
        ActionRecommendation::Planning
    }
}

impl Default for ObjectiveManager {
    fn default() -> Self {
        Self::new()
    }
}
