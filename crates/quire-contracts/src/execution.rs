//! Phase identities and phase execution results.
//!
//! `PhaseStep` is what a phase executor hands back to the coordinator after
//! every attempt. Callers match on `outcome` to decide what happens next:
//! - `Completed` → ask the router for the next phase
//! - `StageFailure { terminal: false }` → the same phase may be re-invoked
//! - `StageFailure { terminal: true }` / `GuardrailViolation` → run is Failed
//! - `Suspended` → persist the state and wait for an external approval
//! - `Skipped` → nothing ran (state was already terminal)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{error::GuardrailViolation, run::WorkflowState, trace::TraceEntry};

/// Attempts a phase gets before a stage failure becomes terminal.
pub const MAX_PHASE_ATTEMPTS: u32 = 3;

/// Critique→revise loops stop once the draft reaches this version.
pub const MAX_DRAFT_VERSION: u32 = 3;

/// One discrete stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Plan,
    Research,
    Write,
    Critique,
    Revise,
    RequestApproval,
    Finalize,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Research => "research",
            Phase::Write => "write",
            Phase::Critique => "critique",
            Phase::Revise => "revise",
            Phase::RequestApproval => "request_approval",
            Phase::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged result of one phase attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    /// The stage succeeded and its output was merged into state.
    Completed,
    /// The stage failed or produced an unusable payload.
    StageFailure {
        reason: String,
        /// True once the retry budget is spent and the run is Failed.
        terminal: bool,
    },
    /// A guardrail check failed. Always terminal.
    GuardrailViolation { violation: GuardrailViolation },
    /// The approval checkpoint is waiting on a human decision.
    Suspended,
    /// The phase did not run because the state was already terminal.
    Skipped,
}

impl PhaseOutcome {
    /// True when the caller may invoke the same phase again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PhaseOutcome::StageFailure { terminal: false, .. })
    }
}

/// The result of one phase executor invocation.
#[derive(Debug, Clone)]
pub struct PhaseStep {
    pub phase: Phase,
    pub state: WorkflowState,
    /// The trace entry this attempt produced. `None` for `Skipped`, or when
    /// the entry itself could not be written.
    pub entry: Option<TraceEntry>,
    pub outcome: PhaseOutcome,
}
