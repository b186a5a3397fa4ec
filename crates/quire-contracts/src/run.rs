//! Run identity and the `WorkflowState` record.
//!
//! `WorkflowState` is owned by the coordinator while a run executes and is
//! persisted by an external store between steps. All mutation goes through
//! the methods below so the invariants hold at every boundary:
//!
//! - `status` only moves along the edges in `WorkflowStatus::can_transition_to`
//! - `current_step` strictly increases and never exceeds `max_steps`
//! - `draft_version` goes up by exactly one per accepted draft
//! - `trace` is append-only and strictly ordered by step

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{QuireError, QuireResult},
    execution::Phase,
    stage::{Critique, Draft, Plan, ResearchFinding, ResearchReport},
    trace::TraceEntry,
};

/// Opaque, immutable identifier of one run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// A new short random identifier (first eight hex chars of a v4 UUID).
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id can be used as a single directory name.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && !self.0.contains(['/', '\\', '\0'])
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Planning,
    Researching,
    Writing,
    Critiquing,
    Revising,
    AwaitingApproval,
    Approved,
    Completed,
    Failed,
}

impl WorkflowStatus {
    /// The status a run carries while (or after) attempting `phase`.
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Plan => WorkflowStatus::Planning,
            Phase::Research => WorkflowStatus::Researching,
            Phase::Write => WorkflowStatus::Writing,
            Phase::Critique => WorkflowStatus::Critiquing,
            Phase::Revise => WorkflowStatus::Revising,
            Phase::RequestApproval => WorkflowStatus::AwaitingApproval,
            Phase::Finalize => WorkflowStatus::Completed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// The state machine edges. Self-edges on working states are retries.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;

        if next == Failed {
            return !self.is_terminal();
        }
        match self {
            Pending => matches!(next, Planning),
            Planning => matches!(next, Planning | Researching),
            Researching => matches!(next, Researching | Planning | Writing),
            Writing => matches!(next, Writing | Critiquing),
            Critiquing => matches!(next, Critiquing | Revising | AwaitingApproval),
            Revising => matches!(next, Revising | Critiquing),
            AwaitingApproval => matches!(next, AwaitingApproval | Approved),
            Approved => matches!(next, Completed),
            Completed | Failed => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Pending => "pending",
            WorkflowStatus::Planning => "planning",
            WorkflowStatus::Researching => "researching",
            WorkflowStatus::Writing => "writing",
            WorkflowStatus::Critiquing => "critiquing",
            WorkflowStatus::Revising => "revising",
            WorkflowStatus::AwaitingApproval => "awaiting_approval",
            WorkflowStatus::Approved => "approved",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The serializable record of one run's progress and accumulated outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub status: WorkflowStatus,
    pub current_step: u32,
    pub max_steps: u32,

    pub request: String,
    pub customer_context: String,

    #[serde(default)]
    pub plan: Option<Plan>,
    /// How many times research sent the run back to planning.
    #[serde(default)]
    pub replan_count: u32,

    #[serde(default)]
    pub research_findings: Vec<ResearchFinding>,
    #[serde(default)]
    pub missing_info: Vec<String>,
    #[serde(default)]
    pub research_sufficient: bool,

    #[serde(default)]
    pub draft: String,
    #[serde(default)]
    pub draft_version: u32,
    #[serde(default)]
    pub citation_count: u32,

    #[serde(default)]
    pub critique: Option<Critique>,
    #[serde(default)]
    pub critique_score: u32,
    #[serde(default)]
    pub revision_needed: bool,

    #[serde(default)]
    pub final_draft: String,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub approval_timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default)]
    pub trace: Vec<TraceEntry>,
}

impl WorkflowState {
    /// A fresh Pending run. Generates a run id when none is supplied.
    pub fn new(
        request: impl Into<String>,
        customer_context: impl Into<String>,
        run_id: Option<RunId>,
        max_steps: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.unwrap_or_else(RunId::generate),
            created_at: now,
            updated_at: now,
            status: WorkflowStatus::Pending,
            current_step: 0,
            max_steps,
            request: request.into(),
            customer_context: customer_context.into(),
            plan: None,
            replan_count: 0,
            research_findings: Vec::new(),
            missing_info: Vec::new(),
            research_sufficient: false,
            draft: String::new(),
            draft_version: 0,
            citation_count: 0,
            critique: None,
            critique_score: 0,
            revision_needed: false,
            final_draft: String::new(),
            approved: false,
            approval_timestamp: None,
            error: None,
            retry_count: 0,
            trace: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Move to `next`, rejecting edges the state machine does not define.
    pub fn transition(&mut self, next: WorkflowStatus) -> QuireResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(QuireError::state(format!(
                "illegal transition {} -> {} for run {}",
                self.status, next, self.run_id
            )));
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Record that the step counter reached `step`.
    pub fn advance_step(&mut self, step: u32) -> QuireResult<()> {
        if step <= self.current_step {
            return Err(QuireError::state(format!(
                "step must increase: {} -> {}",
                self.current_step, step
            )));
        }
        if step > self.max_steps {
            return Err(QuireError::state(format!(
                "step {} exceeds max_steps {}",
                step, self.max_steps
            )));
        }
        self.current_step = step;
        self.touch();
        Ok(())
    }

    /// Mirror a trace entry. Entries must belong to this run and arrive in
    /// strictly increasing step order.
    pub fn record_trace(&mut self, entry: TraceEntry) -> QuireResult<()> {
        if entry.run_id != self.run_id {
            return Err(QuireError::state(format!(
                "trace entry for run {} offered to run {}",
                entry.run_id, self.run_id
            )));
        }
        if let Some(last) = self.trace.last() {
            if entry.step <= last.step {
                return Err(QuireError::state(format!(
                    "trace step {} does not follow step {}",
                    entry.step, last.step
                )));
            }
        }
        self.trace.push(entry);
        self.touch();
        Ok(())
    }

    /// Increment the retry counter and return the new value.
    pub fn bump_retry(&mut self) -> u32 {
        self.retry_count += 1;
        self.retry_count
    }

    pub fn reset_retries(&mut self) {
        self.retry_count = 0;
    }

    pub fn record_replan(&mut self) {
        self.replan_count += 1;
        self.touch();
    }

    pub fn apply_plan(&mut self, plan: Plan) {
        self.plan = Some(plan);
        self.touch();
    }

    /// Merge research output. Topics whose retrieval came back insufficient
    /// are recorded as missing and make the whole pass insufficient.
    pub fn apply_research(&mut self, report: ResearchReport, insufficient_topics: &[String]) {
        let mut missing = report.missing_info;
        for topic in insufficient_topics {
            if !missing.contains(topic) {
                missing.push(topic.clone());
            }
        }
        self.research_findings = report.findings;
        self.missing_info = missing;
        self.research_sufficient = report.overall_sufficient && insufficient_topics.is_empty();
        self.touch();
    }

    /// Accept a new or revised draft.
    pub fn apply_draft(&mut self, draft: Draft) {
        self.draft = draft.content;
        self.citation_count = draft.citation_count;
        self.draft_version += 1;
        self.touch();
    }

    pub fn apply_critique(&mut self, critique: Critique) {
        self.critique_score = critique.overall_score;
        self.revision_needed = critique.revision_needed;
        self.critique = Some(critique);
        self.touch();
    }

    /// Record a positive approval decision.
    pub fn mark_approved(&mut self, at: DateTime<Utc>) -> QuireResult<()> {
        self.transition(WorkflowStatus::Approved)?;
        self.approved = true;
        self.approval_timestamp = Some(at);
        Ok(())
    }

    /// Copy the draft into `final_draft` and complete the run.
    pub fn complete(&mut self) -> QuireResult<()> {
        self.transition(WorkflowStatus::Completed)?;
        self.final_draft = self.draft.clone();
        Ok(())
    }

    /// Mark the run Failed with a human-readable reason.
    ///
    /// A Completed run stays Completed.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status == WorkflowStatus::Completed {
            return;
        }
        self.status = WorkflowStatus::Failed;
        self.error = Some(error.into());
        self.touch();
    }
}
