//! The quire coordinator: drives one run through the phase state machine.
//!
//! Every phase attempt follows the same pipeline:
//!
//!   Skip check → Step budget → Status → Tool → Write path → Slot
//!     → [stage / approval / finalize] → Verify → Merge → Trace → Persist
//!
//! Nothing escapes `execute_phase` as an error. Stage failures and
//! unexpected faults are retried up to `MAX_PHASE_ATTEMPTS`; guardrail
//! violations fail the run on first occurrence. Each attempt, successful or
//! not, writes exactly one trace entry.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use quire_contracts::{
    approval::{ApprovalRequest, ApprovalStatus},
    config::{GuardrailPolicy, QuireConfig},
    error::{GuardrailViolation, QuireError, QuireResult},
    execution::{Phase, PhaseOutcome, PhaseStep, MAX_PHASE_ATTEMPTS},
    run::{RunId, WorkflowState, WorkflowStatus},
    stage::StageKind,
    trace::{TraceEntry, TraceRecord},
};
use quire_policy::Guardrails;

use crate::{
    approval::ApprovalGate,
    phases::{handler_for, PhaseEnv, PhaseHandler},
    router::{Route, Router},
    traits::{Retriever, StageExecutor, StateStore, TraceSink, Verifier},
};

/// Agent name recorded for phases the coordinator runs itself.
pub const COORDINATOR_AGENT: &str = "coordinator";

/// The four stage executors, one per role.
#[derive(Clone)]
pub struct StageSet {
    pub planner: Arc<dyn StageExecutor>,
    pub researcher: Arc<dyn StageExecutor>,
    pub writer: Arc<dyn StageExecutor>,
    pub critic: Arc<dyn StageExecutor>,
}

impl StageSet {
    pub fn get(&self, kind: StageKind) -> &dyn StageExecutor {
        match kind {
            StageKind::Planner => self.planner.as_ref(),
            StageKind::Researcher => self.researcher.as_ref(),
            StageKind::Writer => self.writer.as_ref(),
            StageKind::Critic => self.critic.as_ref(),
        }
    }
}

/// Everything the coordinator talks to besides the stages.
#[derive(Clone)]
pub struct Collaborators {
    pub retriever: Arc<dyn Retriever>,
    pub verifier: Arc<dyn Verifier>,
    pub tracer: Arc<dyn TraceSink>,
    pub store: Arc<dyn StateStore>,
    pub gate: Arc<ApprovalGate>,
}

/// Per-run execution context.
///
/// Built fresh for every `start` and every `resume`, so concurrent runs never
/// share guardrail counters.
#[derive(Debug)]
pub struct RunContext {
    guardrails: Guardrails,
}

impl RunContext {
    pub fn new(policy: GuardrailPolicy) -> Self {
        Self {
            guardrails: Guardrails::new(policy),
        }
    }

    /// A context whose step budget continues from `step`.
    pub fn resumed(policy: GuardrailPolicy, step: u32) -> Self {
        Self {
            guardrails: Guardrails::resumed_at(policy, step),
        }
    }

    pub fn guardrails(&self) -> &Guardrails {
        &self.guardrails
    }
}

/// Why a phase attempt did not complete.
#[derive(Debug)]
enum Fault {
    Guardrail(GuardrailViolation),
    /// Counted against the retry budget. `action` names the failure kind in
    /// the trace.
    Retryable { action: &'static str, reason: String },
    /// Fails the run immediately.
    Fatal(String),
}

impl From<QuireError> for Fault {
    fn from(e: QuireError) -> Self {
        match e {
            QuireError::Guardrail(v) => Fault::Guardrail(v),
            QuireError::StageFailed { reason, .. } => Fault::Retryable {
                action: "error",
                reason,
            },
            QuireError::StateMachineError { reason } => Fault::Fatal(reason),
            QuireError::TraceWriteFailed { reason } => {
                Fault::Fatal(format!("trace write failed: {}", reason))
            }
            other => Fault::Retryable {
                action: "exception",
                reason: other.to_string(),
            },
        }
    }
}

/// The result of a phase body before it is traced.
struct Executed {
    input: Value,
    output: Value,
    outcome: PhaseOutcome,
}

pub struct Coordinator {
    stages: StageSet,
    retriever: Arc<dyn Retriever>,
    verifier: Arc<dyn Verifier>,
    tracer: Arc<dyn TraceSink>,
    store: Arc<dyn StateStore>,
    gate: Arc<ApprovalGate>,
    router: Router,
    config: QuireConfig,
}

impl Coordinator {
    pub fn new(stages: StageSet, collaborators: Collaborators, config: QuireConfig) -> Self {
        Self {
            stages,
            retriever: collaborators.retriever,
            verifier: collaborators.verifier,
            tracer: collaborators.tracer,
            store: collaborators.store,
            gate: collaborators.gate,
            router: Router::new(config.workflow.max_replans),
            config,
        }
    }

    pub fn config(&self) -> &QuireConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    // ── Driver entry points ──────────────────────────────────────────────────

    /// Create a run and execute it until it completes, fails, or suspends
    /// for approval.
    ///
    /// A caller-supplied `run_id` must be unused: a run that already has
    /// saved state or trace entries is returned Failed, with nothing saved
    /// or traced, so the existing run is left as it was.
    pub fn start(
        &self,
        request: &str,
        customer_context: &str,
        run_id: Option<RunId>,
    ) -> WorkflowState {
        let supplied = run_id.is_some();
        let mut state = WorkflowState::new(
            request,
            customer_context,
            run_id,
            self.config.guardrails.max_steps,
        );
        if supplied {
            if let Some(reason) = self.run_id_conflict(&state.run_id) {
                warn!(run_id = %state.run_id, %reason, "refusing to start run");
                state.fail(reason);
                return state;
            }
        }
        info!(run_id = %state.run_id, max_steps = state.max_steps, "run started");
        self.persist(&state);

        let ctx = RunContext::new(self.config.guardrails.clone());
        self.drive(&ctx, self.router.first(), state)
    }

    /// Continue a run whose approval has been granted.
    ///
    /// Finalizes a run that is Approved, or AwaitingApproval with an approved
    /// gate record. Any other state is returned unchanged.
    pub fn resume(&self, mut state: WorkflowState) -> WorkflowState {
        match state.status {
            WorkflowStatus::Approved => {}
            WorkflowStatus::AwaitingApproval if self.gate.is_approved(&state.run_id) => {
                let at = self
                    .gate
                    .get_request(&state.run_id)
                    .and_then(|r| r.resolved_at)
                    .unwrap_or_else(Utc::now);
                if let Err(e) = state.mark_approved(at) {
                    warn!(run_id = %state.run_id, error = %e, "could not apply approval");
                    return state;
                }
                self.persist(&state);
            }
            status => {
                debug!(run_id = %state.run_id, status = %status, "resume is a no-op");
                return state;
            }
        }

        info!(run_id = %state.run_id, step = state.current_step, "run resumed");
        let ctx = RunContext::resumed(self.config.guardrails.clone(), state.current_step);
        self.drive(&ctx, Phase::Finalize, state)
    }

    /// Execute phases from `phase` until the router stops the run.
    fn drive(&self, ctx: &RunContext, mut phase: Phase, mut state: WorkflowState) -> WorkflowState {
        loop {
            let step = self.execute_phase(ctx, phase, state);
            state = step.state;

            match step.outcome {
                PhaseOutcome::Completed => match self.router.next(phase, &state) {
                    Route::Next(next) => {
                        if phase == Phase::Research && next == Phase::Plan {
                            state.record_replan();
                            info!(
                                run_id = %state.run_id,
                                replan = state.replan_count,
                                "research found nothing, replanning"
                            );
                        }
                        debug!(run_id = %state.run_id, from = %phase, to = %next, "routing");
                        phase = next;
                    }
                    Route::Suspend => {
                        info!(run_id = %state.run_id, "run suspended awaiting approval");
                        return state;
                    }
                    Route::Done | Route::Halt => return state,
                },
                ref outcome if outcome.is_retryable() => {
                    debug!(
                        run_id = %state.run_id,
                        phase = %phase,
                        attempt = state.retry_count + 1,
                        "retrying phase"
                    );
                }
                PhaseOutcome::Suspended => {
                    info!(run_id = %state.run_id, "run suspended awaiting approval");
                    return state;
                }
                PhaseOutcome::StageFailure { .. }
                | PhaseOutcome::GuardrailViolation { .. }
                | PhaseOutcome::Skipped => return state,
            }
        }
    }

    // ── Phase execution ──────────────────────────────────────────────────────

    /// Run one attempt of `phase` against `state`.
    ///
    /// Always returns a well-formed state. Failures are recorded in
    /// `state.error` and `state.status`, never returned as `Err`.
    pub fn execute_phase(&self, ctx: &RunContext, phase: Phase, mut state: WorkflowState) -> PhaseStep {
        if state.is_terminal() {
            debug!(run_id = %state.run_id, phase = %phase, status = %state.status, "phase skipped");
            return PhaseStep { phase, state, entry: None, outcome: PhaseOutcome::Skipped };
        }
        if phase == Phase::Finalize && state.status != WorkflowStatus::Approved {
            warn!(run_id = %state.run_id, status = %state.status, "finalize requires an approved run");
            return PhaseStep { phase, state, entry: None, outcome: PhaseOutcome::Skipped };
        }

        let target = WorkflowStatus::for_phase(phase);
        if state.status != target {
            state.reset_retries();
        }

        let handler = handler_for(phase);
        let agent = handler.map(|h| h.stage().as_str()).unwrap_or(COORDINATOR_AGENT);
        let tool = handler.map(|h| h.tool()).unwrap_or(phase.as_str());
        let started = Instant::now();

        let step = match self.admit(ctx, phase, tool, &mut state) {
            Ok(step) => step,
            Err((step, fault)) => return self.fail_phase(phase, state, step, agent, fault, started),
        };

        let slot = match ctx.guardrails.parallel_slot() {
            Ok(slot) => slot,
            Err(v) => {
                return self.fail_phase(phase, state, step, agent, Fault::Guardrail(v), started)
            }
        };

        debug!(run_id = %state.run_id, step, phase = %phase, agent, "phase starting");

        let mut working = state.clone();
        let body = panic::catch_unwind(AssertUnwindSafe(|| match handler {
            Some(h) => self.run_stage(ctx, h, &mut working),
            None if phase == Phase::RequestApproval => self.request_approval(&mut working),
            None => self.finalize(&mut working),
        }));
        drop(slot);

        let executed = match body {
            Ok(Ok(executed)) => executed,
            Ok(Err(e)) => return self.fail_phase(phase, state, step, agent, e.into(), started),
            Err(payload) => {
                let fault = Fault::Retryable {
                    action: "exception",
                    reason: format!("unexpected fault: {}", panic_message(payload.as_ref())),
                };
                return self.fail_phase(phase, state, step, agent, fault, started);
            }
        };

        let action = handler.map(|h| h.action()).unwrap_or(phase.as_str());
        let record = TraceRecord {
            run_id: state.run_id.clone(),
            step,
            agent: agent.to_string(),
            action: action.to_string(),
            input: executed.input,
            output: executed.output,
            success: true,
            error: None,
            duration_ms: Some(elapsed_ms(started)),
        };

        let entry = match self.tracer.record(record) {
            Ok(entry) => entry,
            Err(e) => {
                let fault = Fault::Fatal(format!("trace write failed: {}", e));
                return self.fail_phase(phase, state, step, agent, fault, started);
            }
        };

        state = working;
        if let Err(e) = state.record_trace(entry.clone()) {
            error!(run_id = %state.run_id, step, error = %e, "trace mirror rejected entry");
            state.fail(e.to_string());
            self.persist(&state);
            return PhaseStep {
                phase,
                state,
                entry: Some(entry),
                outcome: PhaseOutcome::StageFailure { reason: e.to_string(), terminal: true },
            };
        }
        self.persist(&state);

        info!(
            run_id = %state.run_id,
            step,
            phase = %phase,
            status = %state.status,
            "phase completed"
        );
        PhaseStep { phase, state, entry: Some(entry), outcome: executed.outcome }
    }

    /// Count the step, move the status, and run the tool and write-path
    /// checks. On failure returns the step number the failed entry uses.
    fn admit(
        &self,
        ctx: &RunContext,
        phase: Phase,
        tool: &str,
        state: &mut WorkflowState,
    ) -> Result<u32, (u32, Fault)> {
        let pending_step = state.current_step + 1;

        let step = ctx
            .guardrails
            .increment_step()
            .map_err(|v| (pending_step, Fault::Guardrail(v)))?;
        if step > state.max_steps {
            let violation = GuardrailViolation::StepBudgetExceeded {
                max_steps: state.max_steps,
                attempted: step,
            };
            return Err((pending_step, Fault::Guardrail(violation)));
        }
        state
            .advance_step(step)
            .map_err(|e| (pending_step, Fault::from(e)))?;

        if phase != Phase::Finalize {
            state
                .transition(WorkflowStatus::for_phase(phase))
                .map_err(|e| (step, Fault::from(e)))?;
        }

        ctx.guardrails
            .validate_tool(tool)
            .map_err(|v| (step, Fault::Guardrail(v)))?;

        if let Some(dir) = self.store.location(&state.run_id) {
            ctx.guardrails
                .validate_write_path(&dir)
                .map_err(|v| (step, Fault::Guardrail(v)))?;
        }

        Ok(step)
    }

    fn run_stage(
        &self,
        ctx: &RunContext,
        handler: &dyn PhaseHandler,
        state: &mut WorkflowState,
    ) -> QuireResult<Executed> {
        let env = PhaseEnv {
            guardrails: &ctx.guardrails,
            retriever: self.retriever.as_ref(),
        };
        let stage = handler.stage();
        let input = handler.build_input(state, &env)?;

        let response = handler.invoke(self.stages.get(stage), &input.stage)?;
        if !response.success {
            let reason = response
                .error
                .unwrap_or_else(|| "stage reported failure without a reason".to_string());
            return Err(QuireError::stage(stage.as_str(), reason));
        }

        let report = self.verifier.verify(&response.content, &handler.schema())?;
        if !report.passed {
            warn!(
                run_id = %state.run_id,
                stage = %stage,
                failures = %report.summary(),
                "stage payload failed verification"
            );
            return Err(QuireError::stage(
                stage.as_str(),
                format!("payload verification failed: {}", report.summary()),
            ));
        }

        let output = handler.parse_output(state, &input, &response.content)?;
        Ok(Executed {
            input: input.trace_input,
            output,
            outcome: PhaseOutcome::Completed,
        })
    }

    fn request_approval(&self, state: &mut WorkflowState) -> QuireResult<Executed> {
        let requirements = state
            .plan
            .as_ref()
            .map(|p| p.requirements.clone())
            .unwrap_or_default();
        let context = json!({
            "requirements": requirements,
            "critique_score": state.critique_score,
            "draft_version": state.draft_version,
        });
        let request = self.gate.request_approval(&state.run_id, &state.draft, context);

        let outcome = if request.status == ApprovalStatus::Approved {
            state.mark_approved(request.resolved_at.unwrap_or_else(Utc::now))?;
            PhaseOutcome::Completed
        } else {
            PhaseOutcome::Suspended
        };

        Ok(Executed {
            input: json!({ "draft_version": state.draft_version }),
            output: json!({ "status": request.status }),
            outcome,
        })
    }

    fn finalize(&self, state: &mut WorkflowState) -> QuireResult<Executed> {
        state.complete()?;
        Ok(Executed {
            input: json!({}),
            output: json!({
                "final_version": state.draft_version,
                "approved": state.approved,
            }),
            outcome: PhaseOutcome::Completed,
        })
    }

    /// Apply the failure policy, write the failed entry, and persist.
    fn fail_phase(
        &self,
        phase: Phase,
        mut state: WorkflowState,
        step: u32,
        agent: &str,
        fault: Fault,
        started: Instant,
    ) -> PhaseStep {
        let run_id = state.run_id.clone();
        let (action, reason, mut outcome) = match fault {
            Fault::Guardrail(violation) => {
                error!(run_id = %run_id, step, agent, violation = %violation, "guardrail violation");
                state.fail(format!("guardrail violation: {}", violation));
                (
                    "guardrail_violation",
                    violation.to_string(),
                    PhaseOutcome::GuardrailViolation { violation },
                )
            }
            Fault::Retryable { action, reason } => {
                let attempts = state.bump_retry();
                let terminal = attempts >= MAX_PHASE_ATTEMPTS;
                if terminal {
                    error!(run_id = %run_id, step, agent, attempts, reason = %reason, "phase failed");
                    state.fail(format!(
                        "{} failed after {} attempts: {}",
                        agent, attempts, reason
                    ));
                } else {
                    warn!(
                        run_id = %run_id,
                        step,
                        agent,
                        attempt = attempts,
                        max_attempts = MAX_PHASE_ATTEMPTS,
                        reason = %reason,
                        "phase attempt failed"
                    );
                }
                (action, reason.clone(), PhaseOutcome::StageFailure { reason, terminal })
            }
            Fault::Fatal(reason) => {
                error!(run_id = %run_id, step, agent, reason = %reason, "phase failed fatally");
                state.fail(reason.clone());
                ("error", reason.clone(), PhaseOutcome::StageFailure { reason, terminal: true })
            }
        };

        let record = TraceRecord {
            run_id: run_id.clone(),
            step,
            agent: agent.to_string(),
            action: action.to_string(),
            input: json!({ "phase": phase.as_str() }),
            output: json!({}),
            success: false,
            error: Some(reason),
            duration_ms: Some(elapsed_ms(started)),
        };

        let entry = match self.tracer.record(record) {
            Ok(entry) => {
                if let Err(e) = state.record_trace(entry.clone()) {
                    warn!(run_id = %run_id, error = %e, "trace mirror rejected failed entry");
                }
                Some(entry)
            }
            Err(e) => {
                error!(run_id = %run_id, step, error = %e, "failed to trace phase failure");
                let reason = format!("trace write failed: {}", e);
                state.fail(reason.clone());
                outcome = PhaseOutcome::StageFailure { reason, terminal: true };
                None
            }
        };

        self.persist(&state);
        PhaseStep { phase, state, entry, outcome }
    }

    // ── Approval control surface ─────────────────────────────────────────────

    /// Approve a suspended run and persist the decision.
    ///
    /// The persisted state is the source of truth: the run is approved even
    /// when the gate no longer holds its pending record (e.g. after a
    /// restart). Call `resume` afterwards to finalize.
    pub fn approve(
        &self,
        run_id: &RunId,
        resolver: &str,
        comments: Option<&str>,
    ) -> QuireResult<WorkflowState> {
        let mut state = self.load_required(run_id)?;
        if state.status != WorkflowStatus::AwaitingApproval {
            return Err(QuireError::state(format!(
                "run {} is {}, not awaiting approval",
                run_id, state.status
            )));
        }

        if !self.gate.approve(run_id, resolver, comments) {
            warn!(run_id = %run_id, "no pending approval record, approving persisted state");
        }
        let at = self
            .gate
            .get_request(run_id)
            .and_then(|r| r.resolved_at)
            .unwrap_or_else(Utc::now);
        state.mark_approved(at)?;
        self.store.save(&state)?;
        info!(run_id = %run_id, resolver, "run approved");
        Ok(state)
    }

    /// Reject a suspended run. The run stays AwaitingApproval.
    ///
    /// Returns whether a pending gate record was resolved.
    pub fn reject(&self, run_id: &RunId, resolver: &str, comments: Option<&str>) -> QuireResult<bool> {
        let state = self.load_required(run_id)?;
        if state.status != WorkflowStatus::AwaitingApproval {
            return Err(QuireError::state(format!(
                "run {} is {}, not awaiting approval",
                run_id, state.status
            )));
        }
        let resolved = self.gate.reject(run_id, resolver, comments);
        info!(run_id = %run_id, resolver, resolved, "run rejected");
        Ok(resolved)
    }

    pub fn approval_status(&self, run_id: &RunId) -> Option<ApprovalStatus> {
        self.gate.get_status(run_id)
    }

    pub fn list_pending(&self) -> Vec<ApprovalRequest> {
        self.gate.list_pending()
    }

    // ── Persistence and trace access ─────────────────────────────────────────

    pub fn load(&self, run_id: &RunId) -> QuireResult<Option<WorkflowState>> {
        self.store.load(run_id)
    }

    pub fn trace(&self, run_id: &RunId) -> QuireResult<Vec<TraceEntry>> {
        self.tracer.entries(run_id)
    }

    fn load_required(&self, run_id: &RunId) -> QuireResult<WorkflowState> {
        self.store.load(run_id)?.ok_or_else(|| QuireError::StoreFailed {
            reason: format!("run {} not found", run_id),
        })
    }

    /// Save failures are logged, not surfaced: the run itself is unaffected.
    /// Why `run_id` cannot name a fresh run, or `None` when it is unused.
    fn run_id_conflict(&self, run_id: &RunId) -> Option<String> {
        match self.store.load(run_id) {
            Ok(Some(_)) => return Some(format!("run '{}' already exists", run_id)),
            Ok(None) => {}
            Err(e) => {
                return Some(format!("cannot check whether run '{}' exists: {}", run_id, e))
            }
        }
        match self.tracer.entries(run_id) {
            Ok(entries) if entries.is_empty() => None,
            Ok(entries) => Some(format!(
                "run '{}' already has {} trace entries",
                run_id,
                entries.len()
            )),
            Err(e) => Some(format!("cannot read the trace of run '{}': {}", run_id, e)),
        }
    }

    fn persist(&self, state: &WorkflowState) {
        if let Err(e) = self.store.save(state) {
            warn!(run_id = %state.run_id, error = %e, "failed to persist state");
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};
    use tempfile::TempDir;

    use quire_contracts::{
        config::QuireConfig,
        error::{GuardrailViolation, QuireError, QuireResult},
        execution::{Phase, PhaseOutcome},
        run::{RunId, WorkflowState, WorkflowStatus},
        stage::{RetrievalResult, RetrievedDocument, StageInput, StageKind, StageResponse},
        trace::{TraceEntry, TraceRecord},
        verify::{PayloadSchema, VerificationFailure, VerificationReport},
    };

    use crate::approval::ApprovalGate;
    use crate::traits::{Retriever, StageExecutor, StateStore, TraceSink, Verifier};

    use super::{Collaborators, Coordinator, RunContext, StageSet};

    // ── Mock helpers ─────────────────────────────────────────────────────────

    type Script = dyn Fn(&StageInput, u32) -> QuireResult<StageResponse> + Send + Sync;

    /// A stage that answers from a closure and counts its calls.
    struct MockStage {
        kind: StageKind,
        calls: Arc<Mutex<u32>>,
        script: Box<Script>,
    }

    impl MockStage {
        fn new(
            kind: StageKind,
            script: impl Fn(&StageInput, u32) -> QuireResult<StageResponse> + Send + Sync + 'static,
        ) -> Self {
            Self { kind, calls: Arc::new(Mutex::new(0)), script: Box::new(script) }
        }

        fn ok(kind: StageKind, content: Value) -> Self {
            Self::new(kind, move |_, _| Ok(StageResponse::ok(content.clone())))
        }
    }

    impl StageExecutor for MockStage {
        fn kind(&self) -> StageKind {
            self.kind
        }

        fn execute(&self, input: &StageInput) -> QuireResult<StageResponse> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            (self.script)(input, n)
        }
    }

    struct MockRetriever {
        hit: bool,
    }

    impl Retriever for MockRetriever {
        fn retrieve(&self, topic: &str) -> QuireResult<RetrievalResult> {
            Ok(RetrievalResult {
                query: topic.to_string(),
                results: if self.hit {
                    vec![RetrievedDocument {
                        id: "d1".to_string(),
                        source: "pricing.md".to_string(),
                        content: "Starter 50/user".to_string(),
                        score: 0.9,
                    }]
                } else {
                    vec![]
                },
                sufficient: self.hit,
            })
        }
    }

    struct MockVerifier {
        pass: bool,
    }

    impl Verifier for MockVerifier {
        fn verify(&self, _payload: &Value, schema: &PayloadSchema) -> QuireResult<VerificationReport> {
            if self.pass {
                Ok(VerificationReport { passed: true, failures: vec![] })
            } else {
                Ok(VerificationReport {
                    passed: false,
                    failures: vec![VerificationFailure {
                        rule_id: schema.schema_id.clone(),
                        message: "payload rejected".to_string(),
                    }],
                })
            }
        }
    }

    /// A trace sink that keeps entries in memory and can be told to fail.
    struct MockTracer {
        entries: Arc<Mutex<Vec<TraceEntry>>>,
        fail: bool,
    }

    impl TraceSink for MockTracer {
        fn record(&self, record: TraceRecord) -> QuireResult<TraceEntry> {
            if self.fail {
                return Err(QuireError::TraceWriteFailed { reason: "disk full".to_string() });
            }
            let entry = record.into_entry();
            self.entries.lock().unwrap().push(entry.clone());
            Ok(entry)
        }

        fn entries(&self, run_id: &RunId) -> QuireResult<Vec<TraceEntry>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| &e.run_id == run_id)
                .cloned()
                .collect())
        }
    }

    struct MockStore {
        states: Arc<Mutex<HashMap<RunId, WorkflowState>>>,
        location: Option<PathBuf>,
    }

    impl StateStore for MockStore {
        fn save(&self, state: &WorkflowState) -> QuireResult<()> {
            self.states.lock().unwrap().insert(state.run_id.clone(), state.clone());
            Ok(())
        }

        fn load(&self, run_id: &RunId) -> QuireResult<Option<WorkflowState>> {
            Ok(self.states.lock().unwrap().get(run_id).cloned())
        }

        fn location(&self, run_id: &RunId) -> Option<PathBuf> {
            self.location.as_ref().map(|p| p.join(run_id.as_str()))
        }
    }

    fn plan_payload() -> Value {
        json!({
            "summary": "Proposal for ACME",
            "requirements": ["Pricing"],
            "tasks": [{ "id": 1, "description": "pricing", "priority": "high", "required_info": ["Pricing"] }]
        })
    }

    fn research_payload() -> Value {
        json!({
            "findings": [{
                "topic": "Pricing",
                "content": "Starter 50/user",
                "source": "pricing.md",
                "relevance_score": 0.9,
                "is_sufficient": true
            }],
            "overall_sufficient": true
        })
    }

    fn draft_payload() -> Value {
        json!({ "content": "# Proposal\n\nPricing [pricing.md]", "sections": ["Pricing"], "citation_count": 1 })
    }

    fn critique_payload(revision_needed: bool) -> Value {
        json!({ "overall_score": 82, "issues": [], "approved": !revision_needed, "revision_needed": revision_needed })
    }

    /// Everything a test needs to build a coordinator and inspect it afterwards.
    struct Harness {
        planner: MockStage,
        researcher: MockStage,
        writer: MockStage,
        critic: MockStage,
        retriever_hit: bool,
        verifier_pass: bool,
        tracer_fail: bool,
        location: Option<PathBuf>,
        config: QuireConfig,
        entries: Arc<Mutex<Vec<TraceEntry>>>,
        states: Arc<Mutex<HashMap<RunId, WorkflowState>>>,
        gate: Arc<ApprovalGate>,
    }

    impl Harness {
        fn new(auto_approve: bool) -> Self {
            let mut config = QuireConfig::default();
            config.approval.auto_approve = auto_approve;
            Self {
                planner: MockStage::ok(StageKind::Planner, plan_payload()),
                researcher: MockStage::ok(StageKind::Researcher, research_payload()),
                writer: MockStage::ok(StageKind::Writer, draft_payload()),
                critic: MockStage::ok(StageKind::Critic, critique_payload(false)),
                retriever_hit: true,
                verifier_pass: true,
                tracer_fail: false,
                location: None,
                config,
                entries: Arc::new(Mutex::new(vec![])),
                states: Arc::new(Mutex::new(HashMap::new())),
                gate: Arc::new(ApprovalGate::new(auto_approve)),
            }
        }

        fn build(self) -> (Coordinator, Spy) {
            let spy = Spy {
                planner: self.planner.calls.clone(),
                researcher: self.researcher.calls.clone(),
                writer: self.writer.calls.clone(),
                critic: self.critic.calls.clone(),
                entries: self.entries.clone(),
                states: self.states.clone(),
                gate: self.gate.clone(),
            };
            let stages = StageSet {
                planner: Arc::new(self.planner),
                researcher: Arc::new(self.researcher),
                writer: Arc::new(self.writer),
                critic: Arc::new(self.critic),
            };
            let collaborators = Collaborators {
                retriever: Arc::new(MockRetriever { hit: self.retriever_hit }),
                verifier: Arc::new(MockVerifier { pass: self.verifier_pass }),
                tracer: Arc::new(MockTracer { entries: self.entries, fail: self.tracer_fail }),
                store: Arc::new(MockStore { states: self.states, location: self.location }),
                gate: self.gate,
            };
            (Coordinator::new(stages, collaborators, self.config), spy)
        }
    }

    struct Spy {
        planner: Arc<Mutex<u32>>,
        researcher: Arc<Mutex<u32>>,
        writer: Arc<Mutex<u32>>,
        critic: Arc<Mutex<u32>>,
        entries: Arc<Mutex<Vec<TraceEntry>>>,
        states: Arc<Mutex<HashMap<RunId, WorkflowState>>>,
        gate: Arc<ApprovalGate>,
    }

    impl Spy {
        fn calls(counter: &Arc<Mutex<u32>>) -> u32 {
            *counter.lock().unwrap()
        }

        fn entry_count(&self) -> usize {
            self.entries.lock().unwrap().len()
        }

        fn saved(&self, run_id: &RunId) -> WorkflowState {
            self.states.lock().unwrap().get(run_id).cloned().unwrap()
        }
    }

    fn actions(state: &WorkflowState) -> Vec<String> {
        state.trace.iter().map(|e| e.action.clone()).collect()
    }

    // ── Happy paths ──────────────────────────────────────────────────────────

    #[test]
    fn test_auto_approve_run_completes() {
        let (coordinator, spy) = Harness::new(true).build();
        let state = coordinator.start("proposal for ACME", "retail", Some(RunId::from("run-a")));

        assert_eq!(state.status, WorkflowStatus::Completed);
        assert!(state.approved);
        assert!(state.approval_timestamp.is_some());
        assert_eq!(state.final_draft, state.draft);
        assert_eq!(state.draft_version, 1);
        assert_eq!(
            actions(&state),
            vec!["create_plan", "research", "write_draft", "critique", "request_approval", "finalize"]
        );

        let steps: Vec<u32> = state.trace.iter().map(|e| e.step).collect();
        assert_eq!(steps, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(state.current_step, 6);
        assert_eq!(spy.entry_count(), 6);
        assert_eq!(spy.saved(&state.run_id), state, "last persisted state must match");
    }

    #[test]
    fn test_start_refuses_an_existing_run_id() {
        let (coordinator, spy) = Harness::new(true).build();
        let run_id = RunId::from("run-dup");
        let first = coordinator.start("proposal", "", Some(run_id.clone()));
        assert_eq!(first.status, WorkflowStatus::Completed);
        let planner_calls = Spy::calls(&spy.planner);

        let second = coordinator.start("another proposal", "", Some(run_id.clone()));

        assert_eq!(second.status, WorkflowStatus::Failed);
        assert!(second.error.as_deref().unwrap_or("").contains("already exists"));
        assert!(second.trace.is_empty());
        assert_eq!(Spy::calls(&spy.planner), planner_calls);
        assert_eq!(spy.entry_count(), 6);
        assert_eq!(spy.saved(&run_id), first, "existing state is untouched");
    }

    #[test]
    fn test_start_refuses_a_run_id_with_orphan_trace() {
        let (coordinator, spy) = Harness::new(true).build();
        let run_id = RunId::from("run-orphan");
        coordinator
            .tracer
            .record(TraceRecord {
                run_id: run_id.clone(),
                step: 1,
                agent: "planner".to_string(),
                action: "create_plan".to_string(),
                input: json!({}),
                output: json!({}),
                success: true,
                error: None,
                duration_ms: None,
            })
            .unwrap();

        let state = coordinator.start("proposal", "", Some(run_id));

        assert_eq!(state.status, WorkflowStatus::Failed);
        assert!(state.error.as_deref().unwrap_or("").contains("trace entries"));
        assert_eq!(Spy::calls(&spy.planner), 0);
        assert_eq!(spy.entry_count(), 1);
    }

    #[test]
    fn test_manual_run_suspends_then_resumes() {
        let (coordinator, spy) = Harness::new(false).build();
        let run_id = RunId::from("run-m");
        let state = coordinator.start("proposal", "", Some(run_id.clone()));

        assert_eq!(state.status, WorkflowStatus::AwaitingApproval);
        assert!(state.error.is_none());
        assert!(spy.gate.is_pending(&run_id));
        assert_eq!(coordinator.list_pending().len(), 1);

        // Resume before a decision changes nothing.
        let unchanged = coordinator.resume(state.clone());
        assert_eq!(unchanged, state);

        let approved = coordinator.approve(&run_id, "alice", Some("ship it")).unwrap();
        assert_eq!(approved.status, WorkflowStatus::Approved);

        let done = coordinator.resume(approved);
        assert_eq!(done.status, WorkflowStatus::Completed);
        assert_eq!(done.final_draft, done.draft);
        assert_eq!(done.trace.last().unwrap().action, "finalize");
        assert_eq!(done.trace.last().unwrap().step, 6);
        assert_eq!(spy.saved(&run_id).status, WorkflowStatus::Completed);
    }

    #[test]
    fn test_resume_picks_up_gate_approval() {
        let (coordinator, spy) = Harness::new(false).build();
        let state = coordinator.start("proposal", "", None);
        spy.gate.approve(&state.run_id, "alice", None);

        let done = coordinator.resume(state);
        assert_eq!(done.status, WorkflowStatus::Completed);
        assert!(done.approved);
    }

    #[test]
    fn test_approve_survives_lost_gate_record() {
        let (coordinator, spy) = Harness::new(false).build();
        let state = coordinator.start("proposal", "", None);
        spy.gate.clear(None);

        let approved = coordinator.approve(&state.run_id, "alice", None).unwrap();
        assert!(approved.approved);
        let done = coordinator.resume(approved);
        assert_eq!(done.status, WorkflowStatus::Completed);
    }

    #[test]
    fn test_reject_leaves_run_awaiting_approval() {
        let (coordinator, _spy) = Harness::new(false).build();
        let state = coordinator.start("proposal", "", None);

        assert!(coordinator.reject(&state.run_id, "bob", Some("too vague")).unwrap());
        let reloaded = coordinator.load(&state.run_id).unwrap().unwrap();
        assert_eq!(reloaded.status, WorkflowStatus::AwaitingApproval);
        assert_eq!(coordinator.resume(reloaded.clone()), reloaded);
    }

    #[test]
    fn test_approve_unknown_or_wrong_state_is_error() {
        let (coordinator, _spy) = Harness::new(true).build();
        assert!(coordinator.approve(&RunId::from("ghost"), "alice", None).is_err());

        let done = coordinator.start("proposal", "", None);
        match coordinator.approve(&done.run_id, "alice", None) {
            Err(QuireError::StateMachineError { reason }) => assert!(reason.contains("completed")),
            other => panic!("expected StateMachineError, got {:?}", other),
        }
    }

    // ── Retry policy ─────────────────────────────────────────────────────────

    #[test]
    fn test_planner_failing_three_times_fails_run() {
        let mut h = Harness::new(true);
        h.planner = MockStage::new(StageKind::Planner, |_, _| Ok(StageResponse::failed("model timed out")));
        let (coordinator, spy) = h.build();

        let state = coordinator.start("proposal", "", None);

        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.retry_count, 3);
        assert_eq!(Spy::calls(&spy.planner), 3);
        assert_eq!(Spy::calls(&spy.researcher), 0);
        assert_eq!(state.trace.len(), 3);
        assert!(state.trace.iter().all(|e| !e.success && e.agent == "planner"));
        let error = state.error.unwrap();
        assert!(error.contains("planner failed after 3 attempts"), "got: {error}");
        assert!(error.contains("model timed out"));
    }

    #[test]
    fn test_transient_failure_is_retried_and_counter_resets() {
        let mut h = Harness::new(true);
        h.planner = MockStage::new(StageKind::Planner, |_, n| {
            if n == 1 {
                Ok(StageResponse::failed("flaky"))
            } else {
                Ok(StageResponse::ok(plan_payload()))
            }
        });
        let (coordinator, spy) = h.build();

        let state = coordinator.start("proposal", "", None);

        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(Spy::calls(&spy.planner), 2);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.trace.len(), 7, "one failed attempt plus six phases");
        assert!(!state.trace[0].success);
        assert_eq!(state.trace[0].action, "error");
    }

    #[test]
    fn test_stage_err_is_retried_like_failure() {
        let mut h = Harness::new(true);
        h.writer = MockStage::new(StageKind::Writer, |_, _| {
            Err(QuireError::stage("writer", "connection reset"))
        });
        let (coordinator, spy) = h.build();

        let state = coordinator.start("proposal", "", None);
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(Spy::calls(&spy.writer), 3);
        assert_eq!(state.trace.len(), 2 + 3);
    }

    #[test]
    fn test_panicking_stage_is_contained() {
        let mut h = Harness::new(true);
        h.critic = MockStage::new(StageKind::Critic, |_, _| panic!("critic exploded"));
        let (coordinator, _spy) = h.build();

        let state = coordinator.start("proposal", "", None);

        assert_eq!(state.status, WorkflowStatus::Failed);
        let failed: Vec<&TraceEntry> = state.trace.iter().filter(|e| !e.success).collect();
        assert_eq!(failed.len(), 3);
        assert!(failed.iter().all(|e| e.action == "exception"));
        assert!(state.error.unwrap().contains("critic exploded"));
    }

    #[test]
    fn test_unverified_payload_is_stage_failure() {
        let mut h = Harness::new(true);
        h.verifier_pass = false;
        let (coordinator, spy) = h.build();

        let state = coordinator.start("proposal", "", None);
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(Spy::calls(&spy.planner), 3);
        assert!(state.plan.is_none(), "rejected payload must not be merged");
        assert!(state.error.unwrap().contains("payload verification failed"));
    }

    #[test]
    fn test_trace_write_failure_fails_run() {
        let mut h = Harness::new(true);
        h.tracer_fail = true;
        let (coordinator, spy) = h.build();

        let state = coordinator.start("proposal", "", None);
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert!(state.error.unwrap().contains("trace write failed"));
        assert_eq!(Spy::calls(&spy.planner), 1);
        assert!(state.plan.is_none());
    }

    // ── Guardrails ───────────────────────────────────────────────────────────

    #[test]
    fn test_disallowed_tool_fails_fast() {
        let mut h = Harness::new(true);
        h.config.guardrails.tool_allowlist.remove("write_draft");
        let (coordinator, spy) = h.build();

        let state = coordinator.start("proposal", "", None);

        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.retry_count, 0, "guardrail violations are never retried");
        assert_eq!(Spy::calls(&spy.writer), 0);
        assert_eq!(actions(&state), vec!["create_plan", "research", "guardrail_violation"]);
        assert!(state.error.unwrap().contains("write_draft"));
    }

    #[test]
    fn test_step_budget_of_three_fails_on_fourth_phase() {
        let mut h = Harness::new(true);
        h.config.guardrails.max_steps = 3;
        let (coordinator, spy) = h.build();

        let state = coordinator.start("proposal", "", None);

        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.current_step, 3);
        assert_eq!(Spy::calls(&spy.critic), 0);
        let last = state.trace.last().unwrap();
        assert_eq!(last.action, "guardrail_violation");
        assert_eq!(last.step, 4);
        assert!(state.error.unwrap().contains("maximum steps (3)"));
    }

    #[test]
    fn test_write_path_outside_roots_fails_fast() {
        let dir = TempDir::new().unwrap();
        let mut h = Harness::new(true);
        h.config.guardrails.allowed_write_paths = vec![dir.path().join("allowed")];
        h.location = Some(dir.path().join("elsewhere"));
        let (coordinator, spy) = h.build();

        let state = coordinator.start("proposal", "", None);

        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(Spy::calls(&spy.planner), 0);
        assert_eq!(state.trace.len(), 1);
        assert_eq!(state.trace[0].action, "guardrail_violation");
    }

    #[test]
    fn test_parallel_budget_exhausted_fails_phase() {
        let mut config = QuireConfig::default();
        config.guardrails.max_parallel = 1;
        let (coordinator, _spy) = Harness::new(true).build();
        let ctx = RunContext::new(config.guardrails.clone());
        let _held = ctx.guardrails().parallel_slot().unwrap();

        let state = WorkflowState::new("proposal", "", None, 20);
        let step = coordinator.execute_phase(&ctx, Phase::Plan, state);

        match step.outcome {
            PhaseOutcome::GuardrailViolation { violation } => {
                assert_eq!(violation, GuardrailViolation::ParallelBudgetExceeded { max_parallel: 1 });
            }
            other => panic!("expected GuardrailViolation, got {:?}", other),
        }
        assert_eq!(step.state.status, WorkflowStatus::Failed);
    }

    // ── Routing loops ────────────────────────────────────────────────────────

    #[test]
    fn test_always_revise_stops_at_third_version() {
        let mut h = Harness::new(false);
        h.critic = MockStage::ok(StageKind::Critic, critique_payload(true));
        let (coordinator, spy) = h.build();

        let state = coordinator.start("proposal", "", None);

        assert_eq!(state.status, WorkflowStatus::AwaitingApproval);
        assert_eq!(state.draft_version, 3);
        assert_eq!(Spy::calls(&spy.critic), 3);
        assert_eq!(Spy::calls(&spy.writer), 3);
        assert_eq!(
            actions(&state),
            vec![
                "create_plan", "research", "write_draft", "critique", "revise_draft",
                "critique", "revise_draft", "critique", "request_approval"
            ]
        );
    }

    #[test]
    fn test_empty_research_replans_until_bound() {
        let mut h = Harness::new(true);
        h.retriever_hit = false;
        h.researcher = MockStage::ok(
            StageKind::Researcher,
            json!({ "findings": [], "missing_info": [], "overall_sufficient": false }),
        );
        let (coordinator, spy) = h.build();

        let state = coordinator.start("proposal", "", None);

        assert_eq!(Spy::calls(&spy.planner), 3);
        assert_eq!(Spy::calls(&spy.researcher), 3);
        assert_eq!(state.replan_count, 2);
        assert_eq!(state.missing_info, vec!["Pricing".to_string()]);
        assert_eq!(state.status, WorkflowStatus::Completed);
    }

    #[test]
    fn test_partial_research_does_not_replan() {
        let mut h = Harness::new(true);
        h.retriever_hit = false;
        let (coordinator, spy) = h.build();

        let state = coordinator.start("proposal", "", None);

        assert_eq!(Spy::calls(&spy.planner), 1);
        assert!(!state.research_sufficient);
        assert_eq!(state.missing_info, vec!["Pricing".to_string()]);
        assert_eq!(state.status, WorkflowStatus::Completed);
    }

    // ── Phase executor contract ──────────────────────────────────────────────

    #[test]
    fn test_phase_on_failed_state_is_skipped() {
        let (coordinator, spy) = Harness::new(true).build();
        let ctx = RunContext::new(coordinator.config().guardrails.clone());
        let mut state = WorkflowState::new("proposal", "", None, 20);
        state.fail("earlier failure");

        let step = coordinator.execute_phase(&ctx, Phase::Write, state);
        assert_eq!(step.outcome, PhaseOutcome::Skipped);
        assert!(step.entry.is_none());
        assert_eq!(Spy::calls(&spy.writer), 0);
        assert_eq!(ctx.guardrails().step_count(), 0);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let (coordinator, _spy) = Harness::new(true).build();
        let done = coordinator.start("proposal", "", None);
        let ctx = RunContext::resumed(coordinator.config().guardrails.clone(), done.current_step);

        let again = coordinator.execute_phase(&ctx, Phase::Finalize, done.clone());
        assert_eq!(again.outcome, PhaseOutcome::Skipped);
        assert_eq!(again.state, done);
    }

    #[test]
    fn test_trace_entries_match_attempts() {
        let mut h = Harness::new(true);
        h.researcher = MockStage::new(StageKind::Researcher, |_, n| {
            if n < 3 {
                Ok(StageResponse::failed("index warming up"))
            } else {
                Ok(StageResponse::ok(research_payload()))
            }
        });
        let (coordinator, spy) = h.build();

        let state = coordinator.start("proposal", "", None);

        let attempts = Spy::calls(&spy.planner)
            + Spy::calls(&spy.researcher)
            + Spy::calls(&spy.writer)
            + Spy::calls(&spy.critic)
            + 2; // request_approval + finalize
        assert_eq!(state.trace.len() as u32, attempts);
        assert_eq!(coordinator.trace(&state.run_id).unwrap(), state.trace);
    }
}
