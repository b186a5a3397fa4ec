//! Phase routing.
//!
//! `Router::next` is a pure function of the phase that just completed and
//! the resulting state. It never mutates anything; the coordinator applies
//! the side effects of a route (such as counting a replan).

use quire_contracts::{
    execution::{Phase, MAX_DRAFT_VERSION},
    run::{WorkflowState, WorkflowStatus},
};

/// Where a run goes after a phase completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Run this phase next.
    Next(Phase),
    /// Hand control back to the caller until an approval decision arrives.
    Suspend,
    /// The run is Completed.
    Done,
    /// The run is Failed; nothing further may run.
    Halt,
}

#[derive(Debug, Clone, Copy)]
pub struct Router {
    max_replans: u32,
}

impl Router {
    pub fn new(max_replans: u32) -> Self {
        Self { max_replans }
    }

    /// Every run starts by planning.
    pub fn first(&self) -> Phase {
        Phase::Plan
    }

    pub fn next(&self, completed: Phase, state: &WorkflowState) -> Route {
        match state.status {
            WorkflowStatus::Failed => return Route::Halt,
            WorkflowStatus::Completed => return Route::Done,
            _ => {}
        }

        match completed {
            Phase::Plan => Route::Next(Phase::Research),
            Phase::Research => {
                if self.should_replan(state) {
                    Route::Next(Phase::Plan)
                } else {
                    Route::Next(Phase::Write)
                }
            }
            Phase::Write => Route::Next(Phase::Critique),
            Phase::Critique => {
                if state.revision_needed && state.draft_version < MAX_DRAFT_VERSION {
                    Route::Next(Phase::Revise)
                } else {
                    Route::Next(Phase::RequestApproval)
                }
            }
            Phase::Revise => Route::Next(Phase::Critique),
            Phase::RequestApproval => {
                if state.approved {
                    Route::Next(Phase::Finalize)
                } else {
                    Route::Suspend
                }
            }
            Phase::Finalize => Route::Done,
        }
    }

    /// Research found nothing at all and the replan budget is not spent.
    ///
    /// Partially insufficient research still proceeds to writing; the gaps
    /// stay in `missing_info`.
    fn should_replan(&self, state: &WorkflowState) -> bool {
        !state.research_sufficient
            && state.research_findings.is_empty()
            && state.replan_count < self.max_replans
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(2)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
