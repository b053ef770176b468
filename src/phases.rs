use crate::phase::PhaseSpec;

/// The eight primary phases (spec §2 component 7), plus the specialized
/// on-demand phases (spec §4.2/§4.11). Registry holds `(name -> phase)`; the
/// coordinator never switches on concrete type (spec §9).
pub const PLANNING: PhaseSpec = PhaseSpec {
    name: "planning",
    system_prompt: "You are the planning phase of an autonomous development pipeline. \
        Read the master plan and existing tasks, then create or update tasks so the \
        codebase converges on the plan. Use task-management and analysis tools.",
    tool_phase_key: "planning",
};

pub const CODING: PhaseSpec = PhaseSpec {
    name: "coding",
    system_prompt: "You are the coding phase. Implement the given task using file \
        operations, file organization, import rewriting, and analysis tools. Leave the \
        task in QA_PENDING when you believe the work satisfies the task description.",
    tool_phase_key: "coding",
};

pub const QA: PhaseSpec = PhaseSpec {
    name: "qa",
    system_prompt: "You are the QA phase. Validate the files attached to this task using \
        analysis and validation tools, then either approve or report issues.",
    tool_phase_key: "qa",
};

pub const DEBUGGING: PhaseSpec = PhaseSpec {
    name: "debugging",
    system_prompt: "You are the debugging phase. Diagnose and fix the reported issue using \
        analysis, validation, file, and investigation tools.",
    tool_phase_key: "debugging",
};

pub const REFACTORING: PhaseSpec = PhaseSpec {
    name: "refactoring",
    system_prompt: "You are the refactoring phase. Improve structure without changing \
        behavior, using refactoring, file, file-organization, and analysis tools. You have \
        a very large context window — use it to recall prior attempts rather than \
        repeating a failing approach.",
    tool_phase_key: "refactoring",
};

pub const DOCUMENTATION: PhaseSpec = PhaseSpec {
    name: "documentation",
    system_prompt: "You are the documentation phase. Record what was built using file and \
        documentation tools, keeping strategic documents current rather than historical.",
    tool_phase_key: "documentation",
};

pub const INVESTIGATION: PhaseSpec = PhaseSpec {
    name: "investigation",
    system_prompt: "You are the investigation phase. Diagnose why an objective is \
        degrading or critical using investigation and analysis tools, and recommend a \
        course of action.",
    tool_phase_key: "investigation",
};

pub const PROJECT_PLANNING: PhaseSpec = PhaseSpec {
    name: "project_planning",
    system_prompt: "You are the project-planning phase. Reassess objectives and task \
        composition at the strategic level using analysis and file tools.",
    tool_phase_key: "project_planning",
};

// --- Specialized phases (spec §4.2, §4.11): activated on demand, bypass the
// tactical selector, and return control to normal selection afterward. ---

pub const PROMPT_DESIGN: PhaseSpec = PhaseSpec {
    name: "prompt_design",
    system_prompt: "You design or improve a phase's system prompt in response to a \
        detected capability gap.",
    tool_phase_key: "specialized",
};

pub const ROLE_DESIGN: PhaseSpec = PhaseSpec {
    name: "role_design",
    system_prompt: "You design or improve the role/tool exposure for a phase.",
    tool_phase_key: "specialized",
};

pub const TOOL_DESIGN: PhaseSpec = PhaseSpec {
    name: "tool_design",
    system_prompt: "You design, evaluate, or adjust a tool's schema or handler contract.",
    tool_phase_key: "specialized",
};

pub const APPLICATION_TROUBLESHOOTING: PhaseSpec = PhaseSpec {
    name: "application_troubleshooting",
    system_prompt: "You troubleshoot a capability gap that blocks every other phase from \
        making progress.",
    tool_phase_key: "specialized",
};

pub const PRIMARY_PHASES: &[&PhaseSpec] = &[
    &PLANNING,
    &CODING,
    &QA,
    &DEBUGGING,
    &REFACTORING,
    &DOCUMENTATION,
    &INVESTIGATION,
    &PROJECT_PLANNING,
];

pub const SPECIALIZED_PHASES: &[&PhaseSpec] = &[
    &PROMPT_DESIGN,
    &ROLE_DESIGN,
    &TOOL_DESIGN,
    &APPLICATION_TROUBLESHOOTING,
];

pub fn find_phase(name: &str) -> Option<&'static PhaseSpec> {
    PRIMARY_PHASES
        .iter()
        .chain(SPECIALIZED_PHASES.iter())
        .find(|p| p.name == name)
        .copied()
}

/// Per-phase tool exposure (spec §6.2). Primary objectives feed coding and
/// documentation; secondary + tertiary feed qa/debugging/refactoring; all
/// three feed refactoring.
pub fn objective_levels_for(phase_name: &str) -> &'static [&'static str] {
    match phase_name {
        "coding" | "documentation" => &["primary"],
        "qa" | "debugging" => &["secondary", "tertiary"],
        "refactoring" => &["primary", "secondary", "tertiary"],
        _ => &[],
    }
}
