use std::time::Duration;

/// Error taxonomy for the orchestrator, per the kinds named in the error
/// handling design: TransientExternal, ToolFailure, StateCorruption,
/// invariant violation, Timeout, Cancellation.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// LLM endpoint timeout or HTTP failure. Recovered locally with bounded
    /// retry + exponential backoff before surfacing.
    #[error("LLM endpoint error after {attempts} attempt(s): {message}")]
    TransientExternal { message: String, attempts: u32 },

    /// A tool handler returned failure. Recorded on the task's error list;
    /// the phase may propose an alternative tool call on the next turn.
    #[error("tool '{tool}' failed: {message}")]
    ToolFailure { tool: String, message: String },

    /// State document failed schema validation. Fatal; the pipeline aborts.
    #[error("state document corrupted: {0}. Recovery: restore from the most recent .autonomy/state.json backup")]
    StateCorruption(String),

    /// A task status transition (or other state invariant) was rejected.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A blocking call exceeded its budget.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Cooperative cancellation; not treated as a failure by the coordinator.
    #[error("operation cancelled")]
    Cancelled,

    /// Config, filesystem, or serialization errors encountered outside a
    /// phase boundary (config load, state store I/O).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// Recovered locally with retry; the coordinator keeps running.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrchestratorError::TransientExternal { .. })
    }

    /// Halts the coordinator's outer loop. Only StateCorruption and the
    /// explicit ASK_USER escalation (handled separately, not an error
    /// variant) stop the pipeline per the propagation policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OrchestratorError::StateCorruption(_))
    }
}

/// Transitional bridge: allows `?` to convert `OrchestratorError` to `String`
/// in call sites that still return `Result<T, String>`.
/// TODO: remove once the coordinator and phases adopt `OrchestratorError` end to end.
impl From<OrchestratorError> for String {
    fn from(err: OrchestratorError) -> String {
        err.to_string()
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
