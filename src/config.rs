use std::path::Path;

use serde::Deserialize;

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub project: ProjectConfig,
    pub execution: ExecutionConfig,
    pub agent: AgentConfig,
    pub loop_detector: LoopDetectorConfig,
    pub lifecycle: LifecycleConfig,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ProjectConfig {
    pub prefix: String,
    pub state_path: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            prefix: "TASK".to_string(),
            state_path: ".autonomy/state.json".to_string(),
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub phase_timeout_minutes: u32,
    pub max_retries: u32,
    pub max_turns: u32,
    pub default_phase_cap: u32,
    pub max_concurrent: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            phase_timeout_minutes: 30,
            max_retries: 3,
            max_turns: 25,
            default_phase_cap: 500,
            max_concurrent: 1,
        }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub endpoint: String,
    pub model: String,
    pub context_length: u32,
    pub stream: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/chat".to_string(),
            model: "default-model".to_string(),
            context_length: 32_000,
            stream: false,
        }
    }
}

/// Thresholds for the loop/intervention detector (spec §4.10). Exposed as
/// configuration per the open question in spec §9 rather than hardcoded.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LoopDetectorConfig {
    pub pattern_repetition_threshold: u32,
    pub cycle_length: u32,
    pub no_progress_threshold: u32,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            pattern_repetition_threshold: 3,
            cycle_length: 4,
            no_progress_threshold: 3,
        }
    }
}

/// Lifecycle-gating thresholds for QA routing (spec §4.2). Keyed by project
/// maturity band; documented defaults are overridable without a code change.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    pub integration_qa_threshold: u32,
    pub consolidation_qa_threshold: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            integration_qa_threshold: 5,
            consolidation_qa_threshold: 3,
        }
    }
}

pub fn validate(config: &OrchestratorConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.execution.max_concurrent < 1 {
        errors.push("execution.max_concurrent must be >= 1".to_string());
    }
    if config.execution.max_turns < 1 {
        errors.push("execution.max_turns must be >= 1".to_string());
    }
    if config.agent.endpoint.is_empty() {
        errors.push("agent.endpoint must not be empty".to_string());
    }
    if config.agent.model.is_empty() {
        errors.push("agent.model must not be empty".to_string());
    }
    if config.loop_detector.pattern_repetition_threshold < 2 {
        errors.push("loop_detector.pattern_repetition_threshold must be >= 2".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Load config from an explicit path (if provided) or fall back to
/// `{project_root}/autonomy.toml`.
///
/// When `config_path` is `Some`, the file MUST exist — returns an error if
/// missing. When `config_path` is `None`, delegates to `load_config` (returns
/// defaults if missing).
pub fn load_config_from(
    config_path: Option<&Path>,
    project_root: &Path,
) -> Result<OrchestratorConfig, String> {
    match config_path {
        Some(path) => load_config_at(path),
        None => load_config(project_root),
    }
}

fn load_config_at(path: &Path) -> Result<OrchestratorConfig, String> {
    if !path.exists() {
        return Err(format!("Config file not found: {}", path.display()));
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

    let config: OrchestratorConfig = toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;

    validate(&config).map_err(|errors| {
        format!(
            "Config validation failed:\n{}",
            errors
                .iter()
                .map(|e| format!("  - {}", e))
                .collect::<Vec<_>>()
                .join("\n")
        )
    })?;

    Ok(config)
}

pub fn load_config(project_root: &Path) -> Result<OrchestratorConfig, String> {
    let config_path = project_root.join("autonomy.toml");

    if !config_path.exists() {
        return Ok(OrchestratorConfig::default());
    }

    load_config_at(&config_path)
}
