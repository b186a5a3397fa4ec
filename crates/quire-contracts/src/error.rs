//! Error types for the quire run coordinator.
//!
//! Fallible operations across the workspace return `QuireResult<T>`. Phase
//! executors themselves never surface these to the caller: the coordinator
//! folds them into `WorkflowState::error` and a failed trace entry.

use std::path::PathBuf;

use thiserror::Error;

/// A safety-policy breach detected by the guardrails.
///
/// Guardrail violations are always fatal to the run and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardrailViolation {
    /// The requested tool is not on the allowlist.
    #[error("tool '{tool}' is not in the allowlist (allowed: {})", allowed.join(", "))]
    ToolNotAllowed { tool: String, allowed: Vec<String> },

    /// The write target resolves outside every allowed root.
    #[error(
        "writing to '{}' is not allowed (allowed roots: {})",
        path.display(),
        allowed_roots.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
    )]
    WritePathNotAllowed {
        path: PathBuf,
        allowed_roots: Vec<PathBuf>,
    },

    /// The run has used up its step budget.
    #[error("maximum steps ({max_steps}) exceeded at step {attempted}")]
    StepBudgetExceeded { max_steps: u32, attempted: u32 },

    /// Every parallel slot is already taken.
    #[error("maximum parallel executions ({max_parallel}) reached")]
    ParallelBudgetExceeded { max_parallel: u32 },
}

/// The unified error type for the quire workspace.
#[derive(Debug, Error)]
pub enum QuireError {
    /// A guardrail check failed.
    #[error("guardrail violation: {0}")]
    Guardrail(#[from] GuardrailViolation),

    /// A stage executor reported failure or produced an unusable payload.
    #[error("stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },

    /// The tracer could not persist an entry.
    ///
    /// A phase whose trace entry cannot be written is treated as failed.
    #[error("trace write failed: {reason}")]
    TraceWriteFailed { reason: String },

    /// A persisted trace log could not be read or parsed.
    #[error("trace read failed: {reason}")]
    TraceReadFailed { reason: String },

    /// The persistence collaborator could not save or load a run.
    #[error("state store failed: {reason}")]
    StoreFailed { reason: String },

    /// A mutation would break a `WorkflowState` invariant.
    #[error("state machine error: {reason}")]
    StateMachineError { reason: String },

    /// A configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// A payload schema could not be compiled or applied.
    #[error("schema validation error: {reason}")]
    SchemaValidation { reason: String },
}

impl QuireError {
    /// Shorthand for a `StateMachineError`.
    pub fn state(reason: impl Into<String>) -> Self {
        Self::StateMachineError {
            reason: reason.into(),
        }
    }

    /// Shorthand for a `StageFailed` error.
    pub fn stage(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the quire crates.
pub type QuireResult<T> = Result<T, QuireError>;
