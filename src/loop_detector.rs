use std::collections::VecDeque;

use crate::config::LoopDetectorConfig;

/// Identifies an action for repetition purposes. Distinct inputs (different
/// `primary_target`) yield distinct fingerprints even for the same tool and
/// task, so QA/investigation's many read-like actions over distinct files
/// are never flagged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub tool_name: String,
    pub primary_target: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAction {
    pub phase: String,
    pub task_id: Option<String>,
    pub fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Intervention {
    /// Force specialist consultation / capability-gap phase.
    ForceSpecialist,
    /// Force project_planning.
    ForceProjectPlanning,
    /// Exhausted escalation; the phase must honor this rather than retry.
    AskUser,
}

pub struct LoopDetector {
    config: LoopDetectorConfig,
    history: VecDeque<RecordedAction>,
    phase_transitions: VecDeque<String>,
    escalation_count: u32,
}

impl LoopDetector {
    pub fn new(config: LoopDetectorConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
            phase_transitions: VecDeque::new(),
            escalation_count: 0,
        }
    }

    /// Records one iteration's outcome and returns an intervention if one is
    /// warranted. Detection is phase-aware via the fingerprint's
    /// `primary_target`: repeated actions against distinct inputs never
    /// count toward repetition.
    pub fn observe(&mut self, action: RecordedAction, task_failure_count: u32, task_advanced: bool) -> Option<Intervention> {
        self.phase_transitions.push_back(action.phase.clone());
        if self.phase_transitions.len() > 64 {
            self.phase_transitions.pop_front();
        }
        self.history.push_back(action.clone());
        if self.history.len() > 256 {
            self.history.pop_front();
        }

        let triggered = self.action_loop(&action)
            || self.pattern_repetition(&action)
            || self.state_cycle()
            || self.no_progress(task_failure_count, task_advanced);

        if !triggered {
            return None;
        }

        self.escalation_count += 1;
        Some(self.escalate())
    }

    /// The same single action repeated >= 3 consecutive times.
    fn action_loop(&self, action: &RecordedAction) -> bool {
        let threshold = self.config.pattern_repetition_threshold as usize;
        if self.history.len() < threshold {
            return false;
        }
        self.history
            .iter()
            .rev()
            .take(threshold)
            .all(|a| a.fingerprint == action.fingerprint)
    }

    /// The same simplified action sequence (phase + tool sequence) repeats
    /// >= N times on the same task id.
    fn pattern_repetition(&self, action: &RecordedAction) -> bool {
        let Some(ref task_id) = action.task_id else {
            return false;
        };
        let threshold = self.config.pattern_repetition_threshold as usize;
        let count = self
            .history
            .iter()
            .filter(|a| a.task_id.as_deref() == Some(task_id.as_str()) && a.fingerprint == action.fingerprint)
            .count();
        count >= threshold
    }

    /// The last K phase transitions form a repeating cycle.
    fn state_cycle(&self) -> bool {
        let k = self.config.cycle_length as usize;
        if self.phase_transitions.len() < k * 2 {
            return false;
        }
        let recent: Vec<&String> = self.phase_transitions.iter().rev().take(k * 2).collect();
        let (first_half, second_half) = recent.split_at(k);
        first_half == second_half
    }

    fn no_progress(&self, task_failure_count: u32, task_advanced: bool) -> bool {
        !task_advanced && task_failure_count >= self.config.no_progress_threshold
    }

    /// Escalation priority order: specialist consultation, then
    /// project_planning, then ASK_USER once exhausted.
    fn escalate(&self) -> Intervention {
        match self.escalation_count {
            1 => Intervention::ForceSpecialist,
            2 => Intervention::ForceProjectPlanning,
            _ => Intervention::AskUser,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(task_id: &str, tool: &str, target: &str, success: bool) -> RecordedAction {
        RecordedAction {
            phase: "coding".to_string(),
            task_id: Some(task_id.to_string()),
            fingerprint: Fingerprint {
                tool_name: tool.to_string(),
                primary_target: target.to_string(),
                success,
            },
        }
    }

    #[test]
    fn two_identical_fingerprints_do_not_trigger() {
        let mut detector = LoopDetector::new(LoopDetectorConfig::default());
        assert!(detector
            .observe(action("t1", "modify_file", "foo.py", false), 0, true)
            .is_none());
        assert!(detector
            .observe(action("t1", "modify_file", "foo.py", false), 0, true)
            .is_none());
    }

    #[test]
    fn third_identical_fingerprint_triggers_action_loop() {
        let mut detector = LoopDetector::new(LoopDetectorConfig::default());
        detector.observe(action("t1", "modify_file", "foo.py", false), 0, true);
        detector.observe(action("t1", "modify_file", "foo.py", false), 0, true);
        let result = detector.observe(action("t1", "modify_file", "foo.py", false), 0, true);
        assert_eq!(result, Some(Intervention::ForceSpecialist));
    }

    #[test]
    fn distinct_targets_do_not_accumulate() {
        let mut detector = LoopDetector::new(LoopDetectorConfig::default());
        detector.observe(action("t1", "modify_file", "foo.py", false), 0, true);
        detector.observe(action("t1", "modify_file", "bar.py", false), 0, true);
        let result = detector.observe(action("t1", "modify_file", "foo.py", false), 0, true);
        assert!(result.is_none());
    }

    #[test]
    fn escalation_priority_advances_on_repeated_triggers() {
        let mut config = LoopDetectorConfig::default();
        config.pattern_repetition_threshold = 2;
        let mut detector = LoopDetector::new(config);

        detector.observe(action("t1", "modify_file", "foo.py", false), 0, true);
        let first = detector
            .observe(action("t1", "modify_file", "foo.py", false), 0, true)
            .unwrap();
        assert_eq!(first, Intervention::ForceSpecialist);

        detector.observe(action("t1", "modify_file", "foo.py", false), 0, true);
        let second = detector
            .observe(action("t1", "modify_file", "foo.py", false), 0, true)
            .unwrap();
        assert_eq!(second, Intervention::ForceProjectPlanning);

        detector.observe(action("t1", "modify_file", "foo.py", false), 0, true);
        let third = detector
            .observe(action("t1", "modify_file", "foo.py", false), 0, true)
            .unwrap();
        assert_eq!(third, Intervention::AskUser);
    }

    #[test]
    fn no_progress_triggers_on_stalled_failure_count() {
        let mut detector = LoopDetector::new(LoopDetectorConfig::default());
        let result = detector.observe(action("t1", "run_tests", "suite", false), 3, false);
        assert!(result.is_some());
    }
}
