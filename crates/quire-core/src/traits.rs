//! Collaborator trait definitions for the quire coordinator.
//!
//! These traits are the seams between the coordinator and everything it
//! does not own:
//!
//! - `StageExecutor` — untrusted content generation (planner, researcher, writer, critic)
//! - `Retriever`     — document lookup for the research phase
//! - `Verifier`      — trusted checker run on every stage payload before merge
//! - `TraceSink`     — trusted, append-only record of every phase attempt
//! - `StateStore`    — persistence of `WorkflowState` between steps
//!
//! All of them are `Send + Sync` so one set of collaborators can serve many
//! concurrent runs.

use std::path::PathBuf;

use serde_json::Value;

use quire_contracts::{
    error::QuireResult,
    run::{RunId, WorkflowState},
    stage::{RetrievalResult, StageInput, StageKind, StageResponse},
    trace::{TraceEntry, TraceRecord},
    verify::{PayloadSchema, VerificationReport},
};

/// One content-producing role.
///
/// Implementations are **untrusted**: their output is verified before it
/// touches state, and a panic inside `execute` is contained by the
/// coordinator and treated as a retryable fault.
pub trait StageExecutor: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Perform one unit of work.
    ///
    /// Report ordinary failure through `StageResponse { success: false }`.
    /// An `Err` is handled the same way.
    fn execute(&self, input: &StageInput) -> QuireResult<StageResponse>;
}

/// The retrieval backend used by the research phase.
pub trait Retriever: Send + Sync {
    /// Look up documents for one topic.
    fn retrieve(&self, topic: &str) -> QuireResult<RetrievalResult>;
}

/// The payload verifier: the last gate before stage output is merged.
pub trait Verifier: Send + Sync {
    /// Return a report with `passed = false` and populated `failures` when
    /// any check fails. `Err` is reserved for a schema that cannot be applied.
    fn verify(&self, payload: &Value, schema: &PayloadSchema) -> QuireResult<VerificationReport>;
}

/// The trace sink: the audit record of a run.
///
/// Every phase attempt, successful or not, produces exactly one record.
/// A failed write is fatal to the run.
pub trait TraceSink: Send + Sync {
    /// Sanitize, buffer and persist one record, returning the stored entry.
    ///
    /// The entry must be durable before this returns.
    fn record(&self, record: TraceRecord) -> QuireResult<TraceEntry>;

    /// All entries for `run_id`, in step order.
    fn entries(&self, run_id: &RunId) -> QuireResult<Vec<TraceEntry>>;
}

/// Persistence for `WorkflowState` between steps and across restarts.
pub trait StateStore: Send + Sync {
    fn save(&self, state: &WorkflowState) -> QuireResult<()>;

    /// `Ok(None)` when no run with this id was ever saved.
    fn load(&self, run_id: &RunId) -> QuireResult<Option<WorkflowState>>;

    /// The directory this store writes the run to, if it writes to disk.
    ///
    /// The coordinator checks it against the write-path guardrail on every
    /// phase.
    fn location(&self, _run_id: &RunId) -> Option<PathBuf> {
        None
    }
}
