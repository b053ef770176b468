use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::NamedTempFile;

use crate::llm::ToolCall;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// LOW (1-5 files affected) | MEDIUM (6-15) | HIGH (16-30) | CRITICAL (30+)
    pub fn from_affected_count(count: usize) -> Self {
        match count {
            0..=5 => RiskLevel::Low,
            6..=15 => RiskLevel::Medium,
            16..=30 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    FileOperations,
    FileOrganization,
    Refactoring,
    Analysis,
    Validation,
    TaskManagement,
    Investigation,
    Documentation,
}

#[derive(Debug, Clone)]
pub struct ToolError {
    pub kind: String,
    pub message: String,
    pub remediation: String,
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.kind, self.message, self.remediation)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
    pub data: Value,
    pub affected_count: usize,
    pub risk: Option<RiskLevel>,
}

pub type ToolOutcome = Result<ToolResult, ToolError>;

/// A named operation with a typed-by-convention parameter schema (validated
/// via `serde_json::Value` field lookups, as the registry has no compile-time
/// knowledge of per-tool argument shapes) and a set of phases it is exposed
/// to.
pub struct ToolDefinition {
    pub name: String,
    pub category: ToolCategory,
    pub phases: Vec<String>,
    handler: Box<dyn Fn(&Path, &Value) -> ToolOutcome + Send + Sync>,
}

pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDefinition>,
    workspace_root: PathBuf,
}

impl ToolRegistry {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let mut registry = Self {
            tools: BTreeMap::new(),
            workspace_root: workspace_root.into(),
        };
        registry.register_builtins();
        registry
    }

    pub fn register(&mut self, definition: ToolDefinition) {
        self.tools.insert(definition.name.clone(), definition);
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn names_for_phase(&self, phase: &str) -> Vec<&str> {
        self.tools
            .values()
            .filter(|t| t.phases.iter().any(|p| p == phase))
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Dispatches a single extracted tool call. Never propagates a raw
    /// exception past this boundary; failures are normalized into
    /// `ToolError{kind, message, remediation}`.
    pub fn dispatch(&self, call: &ToolCall) -> ToolOutcome {
        let definition = self.tools.get(&call.function.name).ok_or_else(|| ToolError {
            kind: "unknown_tool".to_string(),
            message: format!("no handler registered for '{}'", call.function.name),
            remediation: "check the tool name against the phase's exposed tool list".to_string(),
        })?;
        (definition.handler)(&self.workspace_root, &call.function.arguments)
    }

    fn register_builtins(&mut self) {
        self.register(ToolDefinition {
            name: "create_file".to_string(),
            category: ToolCategory::FileOperations,
            phases: vec!["coding".to_string(), "documentation".to_string()],
            handler: Box::new(create_file),
        });
        self.register(ToolDefinition {
            name: "modify_file".to_string(),
            category: ToolCategory::FileOperations,
            phases: vec!["coding".to_string(), "debugging".to_string(), "refactoring".to_string()],
            handler: Box::new(modify_file),
        });
        self.register(ToolDefinition {
            name: "read_file".to_string(),
            category: ToolCategory::FileOperations,
            phases: vec![
                "planning".to_string(),
                "coding".to_string(),
                "qa".to_string(),
                "debugging".to_string(),
                "investigation".to_string(),
            ],
            handler: Box::new(read_file),
        });
        self.register(ToolDefinition {
            name: "move_file".to_string(),
            category: ToolCategory::FileOrganization,
            phases: vec!["coding".to_string(), "refactoring".to_string()],
            handler: Box::new(move_file),
        });
        self.register(ToolDefinition {
            name: "list_files".to_string(),
            category: ToolCategory::Analysis,
            phases: vec![
                "planning".to_string(),
                "coding".to_string(),
                "qa".to_string(),
                "debugging".to_string(),
                "refactoring".to_string(),
                "investigation".to_string(),
            ],
            handler: Box::new(list_files),
        });
        self.register(ToolDefinition {
            name: "validate_syntax".to_string(),
            category: ToolCategory::Validation,
            phases: vec!["qa".to_string(), "debugging".to_string()],
            handler: Box::new(validate_syntax),
        });
        self.register(ToolDefinition {
            name: "record_finding".to_string(),
            category: ToolCategory::Investigation,
            phases: vec!["investigation".to_string(), "debugging".to_string()],
            handler: Box::new(record_finding),
        });
        self.register(ToolDefinition {
            name: "update_documentation".to_string(),
            category: ToolCategory::Documentation,
            phases: vec!["documentation".to_string()],
            handler: Box::new(update_documentation),
        });
        self.register(ToolDefinition {
            name: "propose_task".to_string(),
            category: ToolCategory::TaskManagement,
            phases: vec!["planning".to_string(), "project_planning".to_string()],
            handler: Box::new(propose_task),
        });
        self.register(ToolDefinition {
            name: "compare_files".to_string(),
            category: ToolCategory::Refactoring,
            phases: vec!["refactoring".to_string()],
            handler: Box::new(compare_files),
        });
    }
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| ToolError {
        kind: "invalid_arguments".to_string(),
        message: format!("missing or non-string '{}' argument", key),
        remediation: "re-issue the tool call with the required argument".to_string(),
    })
}

fn resolve(root: &Path, relative: &str) -> PathBuf {
    root.join(relative)
}

/// The file/target a call's arguments are "about", for loop-detection
/// fingerprints (spec §4.10): two calls to the same tool against different
/// targets must never be conflated into one repeated action. Checked in the
/// order a handler is most likely to key off: the common single-file
/// argument names first, then the two-sided `move_file` shape, then
/// whatever free-form identifier the call carries.
pub fn primary_target(call: &ToolCall) -> String {
    let args = &call.function.arguments;
    for key in ["path", "to", "from", "dir", "target_file"] {
        if let Some(v) = args.get(key).and_then(Value::as_str) {
            return v.to_string();
        }
    }
    for key in ["description", "message"] {
        if let Some(v) = args.get(key).and_then(Value::as_str) {
            return v.to_string();
        }
    }
    "unspecified".to_string()
}

fn create_file(root: &Path, args: &Value) -> ToolOutcome {
    let path = arg_str(args, "path")?;
    let content = args.get("content").and_then(Value::as_str).unwrap_or("");
    let full = resolve(root, path);

    if full.exists() {
        return Err(ToolError {
            kind: "precondition_failed".to_string(),
            message: format!("{} already exists", path),
            remediation: "use modify_file to change existing files".to_string(),
        });
    }

    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error("create_file", &e))?;
    }
    atomic_write(&full, content).map_err(|e| io_error("create_file", &e))?;

    Ok(ToolResult {
        files_created: vec![path.to_string()],
        files_modified: vec![],
        data: Value::Null,
        affected_count: 1,
        risk: Some(RiskLevel::Low),
    })
}

fn modify_file(root: &Path, args: &Value) -> ToolOutcome {
    let path = arg_str(args, "path")?;
    let content = arg_str(args, "content")?;
    let full = resolve(root, path);

    if !full.exists() {
        return Err(ToolError {
            kind: "precondition_failed".to_string(),
            message: format!("{} does not exist", path),
            remediation: "use create_file for new files".to_string(),
        });
    }

    atomic_write(&full, content).map_err(|e| io_error("modify_file", &e))?;

    Ok(ToolResult {
        files_created: vec![],
        files_modified: vec![path.to_string()],
        data: Value::Null,
        affected_count: 1,
        risk: Some(RiskLevel::Low),
    })
}

fn read_file(root: &Path, args: &Value) -> ToolOutcome {
    let path = arg_str(args, "path")?;
    let full = resolve(root, path);

    let content = fs::read_to_string(&full).map_err(|e| ToolError {
        kind: "precondition_failed".to_string(),
        message: format!("could not read {}: {}", path, e),
        remediation: "confirm the file path is correct relative to the workspace root".to_string(),
    })?;

    Ok(ToolResult {
        files_created: vec![],
        files_modified: vec![],
        data: Value::String(content),
        affected_count: 1,
        risk: Some(RiskLevel::Low),
    })
}

/// Move/rename with mandatory import rewriting (spec §9: no non-rewriting
/// variant may be exposed). Import rewriting itself is a language-specific
/// analysis plugin and out of scope here; this handler records the rewrite
/// obligation in `data.import_rewrite_required` for the caller to act on.
fn move_file(root: &Path, args: &Value) -> ToolOutcome {
    let from = arg_str(args, "from")?;
    let to = arg_str(args, "to")?;
    let affected = args
        .get("affected_files")
        .and_then(Value::as_array)
        .map(|a| a.len())
        .unwrap_or(1);

    let from_full = resolve(root, from);
    let to_full = resolve(root, to);

    if !from_full.exists() {
        return Err(ToolError {
            kind: "precondition_failed".to_string(),
            message: format!("{} does not exist", from),
            remediation: "confirm the source path before moving".to_string(),
        });
    }

    if let Some(parent) = to_full.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error("move_file", &e))?;
    }
    fs::rename(&from_full, &to_full).map_err(|e| io_error("move_file", &e))?;

    Ok(ToolResult {
        files_created: vec![to.to_string()],
        files_modified: vec![],
        data: serde_json::json!({ "import_rewrite_required": true }),
        affected_count: affected,
        risk: Some(RiskLevel::from_affected_count(affected)),
    })
}

/// Lists entries of a directory relative to the workspace root (default
/// `.`), non-recursive. Used by planning/investigation to orient before
/// reading specific files.
fn list_files(root: &Path, args: &Value) -> ToolOutcome {
    let dir = args.get("dir").and_then(Value::as_str).unwrap_or(".");
    let full = resolve(root, dir);

    let entries = fs::read_dir(&full)
        .map_err(|e| ToolError {
            kind: "precondition_failed".to_string(),
            message: format!("could not list {}: {}", dir, e),
            remediation: "confirm the directory path is correct relative to the workspace root".to_string(),
        })?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();

    Ok(ToolResult {
        files_created: vec![],
        files_modified: vec![],
        data: serde_json::json!({ "entries": entries }),
        affected_count: 0,
        risk: None,
    })
}

/// A cheap structural check (balanced braces/parens/brackets), standing in
/// for a real parser: good enough to catch the class of errors a coding
/// phase's own tool calls are likely to introduce without a language-aware
/// dependency.
fn validate_syntax(root: &Path, args: &Value) -> ToolOutcome {
    let path = arg_str(args, "path")?;
    let full = resolve(root, path);
    let content = fs::read_to_string(&full).map_err(|e| ToolError {
        kind: "precondition_failed".to_string(),
        message: format!("could not read {}: {}", path, e),
        remediation: "confirm the file path is correct relative to the workspace root".to_string(),
    })?;

    let balanced = is_balanced(&content, '{', '}')
        && is_balanced(&content, '(', ')')
        && is_balanced(&content, '[', ']');

    Ok(ToolResult {
        files_created: vec![],
        files_modified: vec![],
        data: serde_json::json!({ "balanced": balanced }),
        affected_count: 1,
        risk: None,
    })
}

fn is_balanced(content: &str, open: char, close: char) -> bool {
    let mut depth = 0i64;
    for ch in content.chars() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth < 0 {
                return false;
            }
        }
    }
    depth == 0
}

/// Appends a timestamped line to the investigation log. Investigation
/// produces narrative findings, not file edits, so this is additive rather
/// than destructive and carries no risk classification.
fn record_finding(root: &Path, args: &Value) -> ToolOutcome {
    let message = arg_str(args, "message")?;
    let log_path = resolve(root, ".autonomy/investigation_log.md");
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error("record_finding", &e))?;
    }
    let mut existing = fs::read_to_string(&log_path).unwrap_or_default();
    existing.push_str(&format!("- [{}] {}\n", chrono::Utc::now().to_rfc3339(), message));
    atomic_write(&log_path, &existing).map_err(|e| io_error("record_finding", &e))?;

    Ok(ToolResult {
        files_created: vec![],
        files_modified: vec![".autonomy/investigation_log.md".to_string()],
        data: Value::Null,
        affected_count: 1,
        risk: Some(RiskLevel::Low),
    })
}

/// Creates or overwrites a strategic document. Unlike `modify_file`,
/// documentation is expected to be kept current rather than append-only, so
/// no precondition on prior existence is enforced.
fn update_documentation(root: &Path, args: &Value) -> ToolOutcome {
    let path = arg_str(args, "path")?;
    let content = arg_str(args, "content")?;
    let full = resolve(root, path);
    let created = !full.exists();

    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error("update_documentation", &e))?;
    }
    atomic_write(&full, content).map_err(|e| io_error("update_documentation", &e))?;

    Ok(ToolResult {
        files_created: if created { vec![path.to_string()] } else { vec![] },
        files_modified: if created { vec![] } else { vec![path.to_string()] },
        data: Value::Null,
        affected_count: 1,
        risk: Some(RiskLevel::Low),
    })
}

/// Task management has no direct handle onto `PipelineState` — handlers are
/// pure filesystem operations (spec §4.7's common contracts say nothing
/// about state access). Planning appends proposals here; the coordinator is
/// responsible for folding them into `state.tasks` on its next turn.
fn propose_task(root: &Path, args: &Value) -> ToolOutcome {
    let description = arg_str(args, "description")?;
    let queue_path = resolve(root, ".autonomy/proposed_tasks.jsonl");
    if let Some(parent) = queue_path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error("propose_task", &e))?;
    }
    let entry = serde_json::json!({
        "description": description,
        "priority": args.get("priority").and_then(Value::as_i64).unwrap_or(0),
        "target_file": args.get("target_file").and_then(Value::as_str),
        "proposed_at": chrono::Utc::now().to_rfc3339(),
    });
    let mut existing = fs::read_to_string(&queue_path).unwrap_or_default();
    existing.push_str(&entry.to_string());
    existing.push('\n');
    atomic_write(&queue_path, &existing).map_err(|e| io_error("propose_task", &e))?;

    Ok(ToolResult {
        files_created: vec![],
        files_modified: vec![".autonomy/proposed_tasks.jsonl".to_string()],
        data: entry,
        affected_count: 1,
        risk: Some(RiskLevel::Low),
    })
}

/// Line-level comparison between two files, read-only. Lets the refactoring
/// phase confirm a structural change (e.g. a move or an extraction) left
/// behavior equivalent before committing to it, without needing a real diff
/// dependency.
fn compare_files(root: &Path, args: &Value) -> ToolOutcome {
    let a_path = arg_str(args, "a")?;
    let b_path = arg_str(args, "b")?;

    let a = fs::read_to_string(resolve(root, a_path)).map_err(|e| ToolError {
        kind: "precondition_failed".to_string(),
        message: format!("could not read {}: {}", a_path, e),
        remediation: "confirm the file path is correct relative to the workspace root".to_string(),
    })?;
    let b = fs::read_to_string(resolve(root, b_path)).map_err(|e| ToolError {
        kind: "precondition_failed".to_string(),
        message: format!("could not read {}: {}", b_path, e),
        remediation: "confirm the file path is correct relative to the workspace root".to_string(),
    })?;

    let a_lines: Vec<&str> = a.lines().collect();
    let b_lines: Vec<&str> = b.lines().collect();
    let differing_lines = a_lines
        .iter()
        .zip(b_lines.iter())
        .filter(|(x, y)| x != y)
        .count()
        + a_lines.len().abs_diff(b_lines.len());

    Ok(ToolResult {
        files_created: vec![],
        files_modified: vec![],
        data: serde_json::json!({ "identical": differing_lines == 0, "differing_lines": differing_lines }),
        affected_count: 0,
        risk: None,
    })
}

fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_file = NamedTempFile::new_in(parent)?;
    fs::write(temp_file.path(), content)?;
    let file = fs::File::open(temp_file.path())?;
    file.sync_all()?;
    temp_file
        .persist(path)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(())
}

fn io_error(tool: &str, err: &std::io::Error) -> ToolError {
    ToolError {
        kind: "io_error".to_string(),
        message: format!("{}: {}", tool, err),
        remediation: "check filesystem permissions and available disk space".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCallFunction;

    #[test]
    fn create_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(dir.path());

        let create = ToolCall {
            function: ToolCallFunction {
                name: "create_file".into(),
                arguments: serde_json::json!({"path": "src/new.rs", "content": "fn main() {}"}),
            },
        };
        let result = registry.dispatch(&create).unwrap();
        assert_eq!(result.files_created, vec!["src/new.rs".to_string()]);

        let read = ToolCall {
            function: ToolCallFunction {
                name: "read_file".into(),
                arguments: serde_json::json!({"path": "src/new.rs"}),
            },
        };
        let result = registry.dispatch(&read).unwrap();
        assert_eq!(result.data, Value::String("fn main() {}".to_string()));
    }

    #[test]
    fn create_file_rejects_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(dir.path());
        let call = ToolCall {
            function: ToolCallFunction {
                name: "create_file".into(),
                arguments: serde_json::json!({"path": "a.rs", "content": "x"}),
            },
        };
        registry.dispatch(&call).unwrap();
        let err = registry.dispatch(&call).unwrap_err();
        assert_eq!(err.kind, "precondition_failed");
    }

    #[test]
    fn unknown_tool_returns_normalized_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(dir.path());
        let call = ToolCall {
            function: ToolCallFunction {
                name: "teleport_file".into(),
                arguments: Value::Null,
            },
        };
        let err = registry.dispatch(&call).unwrap_err();
        assert_eq!(err.kind, "unknown_tool");
    }

    #[test]
    fn primary_target_prefers_path_over_other_keys() {
        let call = ToolCall {
            function: ToolCallFunction {
                name: "modify_file".into(),
                arguments: serde_json::json!({"path": "src/lib.rs", "content": "x"}),
            },
        };
        assert_eq!(primary_target(&call), "src/lib.rs");
    }

    #[test]
    fn primary_target_falls_back_to_unspecified() {
        let call = ToolCall {
            function: ToolCallFunction {
                name: "noop".into(),
                arguments: serde_json::json!({"priority": 1}),
            },
        };
        assert_eq!(primary_target(&call), "unspecified");
    }

    #[test]
    fn risk_classification_bands_match_spec() {
        assert_eq!(RiskLevel::from_affected_count(1), RiskLevel::Low);
        assert_eq!(RiskLevel::from_affected_count(5), RiskLevel::Low);
        assert_eq!(RiskLevel::from_affected_count(6), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_affected_count(15), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_affected_count(16), RiskLevel::High);
        assert_eq!(RiskLevel::from_affected_count(30), RiskLevel::High);
        assert_eq!(RiskLevel::from_affected_count(31), RiskLevel::Critical);
    }

    #[test]
    fn move_file_marks_import_rewrite_required() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("old.rs"), "content").unwrap();
        let registry = ToolRegistry::new(dir.path());
        let call = ToolCall {
            function: ToolCallFunction {
                name: "move_file".into(),
                arguments: serde_json::json!({"from": "old.rs", "to": "new.rs"}),
            },
        };
        let result = registry.dispatch(&call).unwrap();
        assert_eq!(result.data["import_rewrite_required"], true);
    }

    #[test]
    fn list_files_reports_directory_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "").unwrap();
        fs::write(dir.path().join("b.rs"), "").unwrap();
        let registry = ToolRegistry::new(dir.path());
        let call = ToolCall {
            function: ToolCallFunction {
                name: "list_files".into(),
                arguments: serde_json::json!({"dir": "."}),
            },
        };
        let result = registry.dispatch(&call).unwrap();
        let entries = result.data["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn list_files_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(dir.path());
        let call = ToolCall {
            function: ToolCallFunction {
                name: "list_files".into(),
                arguments: serde_json::json!({"dir": "does/not/exist"}),
            },
        };
        let err = registry.dispatch(&call).unwrap_err();
        assert_eq!(err.kind, "precondition_failed");
    }

    #[test]
    fn validate_syntax_flags_unbalanced_braces() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.rs"), "fn main() {").unwrap();
        let registry = ToolRegistry::new(dir.path());
        let call = ToolCall {
            function: ToolCallFunction {
                name: "validate_syntax".into(),
                arguments: serde_json::json!({"path": "broken.rs"}),
            },
        };
        let result = registry.dispatch(&call).unwrap();
        assert_eq!(result.data["balanced"], false);
    }

    #[test]
    fn validate_syntax_accepts_balanced_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ok.rs"), "fn main() { let v = [1, 2, (3)]; }").unwrap();
        let registry = ToolRegistry::new(dir.path());
        let call = ToolCall {
            function: ToolCallFunction {
                name: "validate_syntax".into(),
                arguments: serde_json::json!({"path": "ok.rs"}),
            },
        };
        let result = registry.dispatch(&call).unwrap();
        assert_eq!(result.data["balanced"], true);
    }

    #[test]
    fn record_finding_appends_to_investigation_log() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(dir.path());
        let call = ToolCall {
            function: ToolCallFunction {
                name: "record_finding".into(),
                arguments: serde_json::json!({"message": "root cause is a stale cache"}),
            },
        };
        registry.dispatch(&call).unwrap();
        registry.dispatch(&call).unwrap();
        let log = fs::read_to_string(dir.path().join(".autonomy/investigation_log.md")).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.contains("root cause is a stale cache"));
    }

    #[test]
    fn update_documentation_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/ARCHITECTURE.md"), "old").unwrap();
        let registry = ToolRegistry::new(dir.path());
        let call = ToolCall {
            function: ToolCallFunction {
                name: "update_documentation".into(),
                arguments: serde_json::json!({"path": "docs/ARCHITECTURE.md", "content": "new"}),
            },
        };
        let result = registry.dispatch(&call).unwrap();
        assert_eq!(result.files_modified, vec!["docs/ARCHITECTURE.md".to_string()]);
        assert_eq!(fs::read_to_string(dir.path().join("docs/ARCHITECTURE.md")).unwrap(), "new");
    }

    #[test]
    fn compare_files_reports_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn main() {}\n").unwrap();
        fs::write(dir.path().join("b.rs"), "fn main() {}\n").unwrap();
        let registry = ToolRegistry::new(dir.path());
        let call = ToolCall {
            function: ToolCallFunction {
                name: "compare_files".into(),
                arguments: serde_json::json!({"a": "a.rs", "b": "b.rs"}),
            },
        };
        let result = registry.dispatch(&call).unwrap();
        assert_eq!(result.data["identical"], true);
        assert_eq!(result.data["differing_lines"], 0);
    }

    #[test]
    fn compare_files_counts_differing_and_extra_lines() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn main() {\n    old();\n}\n").unwrap();
        fs::write(dir.path().join("b.rs"), "fn main() {\n    new();\n    extra();\n}\n").unwrap();
        let registry = ToolRegistry::new(dir.path());
        let call = ToolCall {
            function: ToolCallFunction {
                name: "compare_files".into(),
                arguments: serde_json::json!({"a": "a.rs", "b": "b.rs"}),
            },
        };
        let result = registry.dispatch(&call).unwrap();
        assert_eq!(result.data["identical"], false);
        assert_eq!(result.data["differing_lines"], 2);
    }

    #[test]
    fn propose_task_queues_a_jsonl_entry() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::new(dir.path());
        let call = ToolCall {
            function: ToolCallFunction {
                name: "propose_task".into(),
                arguments: serde_json::json!({"description": "add retry to the http client", "priority": 2}),
            },
        };
        let result = registry.dispatch(&call).unwrap();
        assert_eq!(result.data["description"], "add retry to the http client");
        let queue = fs::read_to_string(dir.path().join(".autonomy/proposed_tasks.jsonl")).unwrap();
        assert_eq!(queue.lines().count(), 1);
    }
}
