//! Stage-backed phase handlers.
//!
//! Each stage-backed phase (plan, research, write, critique, revise) is one
//! `PhaseHandler`: it builds the stage input from state, invokes the stage,
//! and parses the verified payload back into state. The coordinator picks the
//! handler by phase with [`handler_for`] and drives it; approval and
//! finalization have no stage and are handled by the coordinator itself.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use quire_contracts::{
    error::{QuireError, QuireResult},
    execution::Phase,
    run::WorkflowState,
    stage::{Critique, Draft, Plan, ResearchReport, StageInput, StageKind, StageResponse},
    verify::{PayloadSchema, VerificationRule, VerificationRuleType},
};
use quire_policy::Guardrails;

use crate::traits::{Retriever, StageExecutor};

/// Allowlist name checked before every retrieval call.
pub const RETRIEVE_TOOL: &str = "retrieve";

/// A citation marker with no source in it.
const EMPTY_CITATION: &str = "[Source: ]";

/// What a handler prepared for one attempt.
#[derive(Debug, Clone)]
pub struct PhaseInput {
    pub stage: StageInput,
    /// The compact view of the input written to the trace.
    pub trace_input: Value,
    /// Research topics whose retrieval came back insufficient.
    pub insufficient_topics: Vec<String>,
}

/// Collaborators a handler may need while building its input.
pub struct PhaseEnv<'a> {
    pub guardrails: &'a Guardrails,
    pub retriever: &'a dyn Retriever,
}

pub trait PhaseHandler: Send + Sync {
    /// The stage role this phase calls.
    fn stage(&self) -> StageKind;

    /// Allowlist name validated before the stage runs.
    fn tool(&self) -> &'static str;

    /// Action name sent to the stage and recorded on success.
    fn action(&self) -> &'static str;

    fn build_input(&self, state: &WorkflowState, env: &PhaseEnv<'_>) -> QuireResult<PhaseInput>;

    fn invoke(&self, executor: &dyn StageExecutor, input: &StageInput) -> QuireResult<StageResponse> {
        executor.execute(input)
    }

    /// The shape the stage payload must have before it is parsed.
    fn schema(&self) -> PayloadSchema;

    /// Merge a verified payload into `state` and return the trace output.
    fn parse_output(
        &self,
        state: &mut WorkflowState,
        input: &PhaseInput,
        content: &Value,
    ) -> QuireResult<Value>;
}

static PLAN: PlanPhase = PlanPhase;
static RESEARCH: ResearchPhase = ResearchPhase;
static WRITE: WritePhase = WritePhase;
static CRITIQUE: CritiquePhase = CritiquePhase;
static REVISE: RevisePhase = RevisePhase;

/// The handler for a stage-backed phase, `None` for approval and finalize.
pub fn handler_for(phase: Phase) -> Option<&'static dyn PhaseHandler> {
    match phase {
        Phase::Plan => Some(&PLAN),
        Phase::Research => Some(&RESEARCH),
        Phase::Write => Some(&WRITE),
        Phase::Critique => Some(&CRITIQUE),
        Phase::Revise => Some(&REVISE),
        Phase::RequestApproval | Phase::Finalize => None,
    }
}

fn decode<T: DeserializeOwned>(stage: StageKind, content: &Value) -> QuireResult<T> {
    serde_json::from_value(content.clone())
        .map_err(|e| QuireError::stage(stage.as_str(), format!("malformed payload: {}", e)))
}

fn stage_input(stage: StageKind, action: &str, payload: Value) -> StageInput {
    StageInput {
        stage,
        action: action.to_string(),
        payload,
    }
}

fn required(rule_id: &str, field_path: &str) -> VerificationRule {
    VerificationRule {
        rule_id: rule_id.to_string(),
        description: format!("'{}' must be present", field_path),
        rule_type: VerificationRuleType::RequiredField {
            field_path: field_path.to_string(),
        },
    }
}

fn requirements(state: &WorkflowState) -> Vec<String> {
    state
        .plan
        .as_ref()
        .map(|p| p.requirements.clone())
        .unwrap_or_default()
}

fn draft_schema(schema_id: &str) -> PayloadSchema {
    PayloadSchema {
        schema_id: schema_id.to_string(),
        json_schema: json!({
            "type": "object",
            "required": ["content"],
            "properties": {
                "content": { "type": "string", "minLength": 1 },
                "sections": { "type": "array", "items": { "type": "string" } },
                "citation_count": { "type": "integer", "minimum": 0 }
            }
        }),
        rules: vec![
            required("draft-content", "content"),
            VerificationRule {
                rule_id: "draft-empty-citation".to_string(),
                description: "every citation must name a source".to_string(),
                rule_type: VerificationRuleType::ForbiddenPattern {
                    field_path: "content".to_string(),
                    pattern: EMPTY_CITATION.to_string(),
                },
            },
        ],
    }
}

// ── Plan ──────────────────────────────────────────────────────────────────────

pub struct PlanPhase;

impl PhaseHandler for PlanPhase {
    fn stage(&self) -> StageKind {
        StageKind::Planner
    }

    fn tool(&self) -> &'static str {
        "plan"
    }

    fn action(&self) -> &'static str {
        "create_plan"
    }

    fn build_input(&self, state: &WorkflowState, _env: &PhaseEnv<'_>) -> QuireResult<PhaseInput> {
        let previous_questions = state
            .plan
            .as_ref()
            .map(|p| p.questions.clone())
            .unwrap_or_default();
        Ok(PhaseInput {
            stage: stage_input(
                self.stage(),
                self.action(),
                json!({
                    "request": state.request,
                    "customer_context": state.customer_context,
                    "missing_info": state.missing_info,
                    "previous_questions": previous_questions,
                    "replan_count": state.replan_count,
                }),
            ),
            trace_input: json!({
                "request": state.request,
                "replan_count": state.replan_count,
            }),
            insufficient_topics: Vec::new(),
        })
    }

    fn schema(&self) -> PayloadSchema {
        PayloadSchema {
            schema_id: "plan-v1".to_string(),
            json_schema: json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string" },
                    "requirements": { "type": "array", "items": { "type": "string" } },
                    "tasks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "required_info": { "type": "array", "items": { "type": "string" } }
                            }
                        }
                    },
                    "questions": { "type": "array", "items": { "type": "string" } }
                }
            }),
            rules: vec![],
        }
    }

    fn parse_output(
        &self,
        state: &mut WorkflowState,
        _input: &PhaseInput,
        content: &Value,
    ) -> QuireResult<Value> {
        let plan: Plan = decode(self.stage(), content)?;
        debug!(
            run_id = %state.run_id,
            requirements = plan.requirements.len(),
            tasks = plan.tasks.len(),
            "plan parsed"
        );
        state.apply_plan(plan);
        Ok(content.clone())
    }
}

// ── Research ──────────────────────────────────────────────────────────────────

pub struct ResearchPhase;

impl PhaseHandler for ResearchPhase {
    fn stage(&self) -> StageKind {
        StageKind::Researcher
    }

    fn tool(&self) -> &'static str {
        "research"
    }

    fn action(&self) -> &'static str {
        "research"
    }

    /// Retrieve once per topic, each call checked against the allowlist.
    fn build_input(&self, state: &WorkflowState, env: &PhaseEnv<'_>) -> QuireResult<PhaseInput> {
        let plan = state.plan.clone().unwrap_or_default();
        let topics = plan.search_topics();

        let mut retrieved = Vec::with_capacity(topics.len());
        let mut insufficient_topics = Vec::new();
        for topic in &topics {
            env.guardrails.validate_tool(RETRIEVE_TOOL)?;
            let result = env.retriever.retrieve(topic)?;
            debug!(
                run_id = %state.run_id,
                topic = %topic,
                hits = result.results.len(),
                sufficient = result.sufficient,
                "topic retrieved"
            );
            if !result.sufficient {
                insufficient_topics.push(topic.clone());
            }
            retrieved.push(result);
        }

        Ok(PhaseInput {
            stage: stage_input(
                self.stage(),
                self.action(),
                json!({
                    "topics": topics,
                    "plan_summary": plan.summary,
                    "retrieved": retrieved,
                }),
            ),
            trace_input: json!({ "topics": topics }),
            insufficient_topics,
        })
    }

    fn schema(&self) -> PayloadSchema {
        PayloadSchema {
            schema_id: "research-v1".to_string(),
            json_schema: json!({
                "type": "object",
                "required": ["overall_sufficient"],
                "properties": {
                    "overall_sufficient": { "type": "boolean" },
                    "missing_info": { "type": "array", "items": { "type": "string" } },
                    "findings": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["topic", "content"],
                            "properties": {
                                "topic": { "type": "string" },
                                "content": { "type": "string" },
                                "relevance_score": { "type": "number" }
                            }
                        }
                    }
                }
            }),
            rules: vec![required("research-sufficiency", "overall_sufficient")],
        }
    }

    fn parse_output(
        &self,
        state: &mut WorkflowState,
        input: &PhaseInput,
        content: &Value,
    ) -> QuireResult<Value> {
        let report: ResearchReport = decode(self.stage(), content)?;
        state.apply_research(report, &input.insufficient_topics);
        debug!(
            run_id = %state.run_id,
            findings = state.research_findings.len(),
            sufficient = state.research_sufficient,
            "research parsed"
        );
        Ok(content.clone())
    }
}

// ── Write ─────────────────────────────────────────────────────────────────────

pub struct WritePhase;

impl PhaseHandler for WritePhase {
    fn stage(&self) -> StageKind {
        StageKind::Writer
    }

    fn tool(&self) -> &'static str {
        "write_draft"
    }

    fn action(&self) -> &'static str {
        "write_draft"
    }

    fn build_input(&self, state: &WorkflowState, _env: &PhaseEnv<'_>) -> QuireResult<PhaseInput> {
        let requirements = requirements(state);
        Ok(PhaseInput {
            stage: stage_input(
                self.stage(),
                self.action(),
                json!({
                    "requirements": requirements,
                    "customer_context": state.customer_context,
                    "findings": state.research_findings,
                    "missing_info": state.missing_info,
                }),
            ),
            trace_input: json!({
                "requirements": requirements,
                "findings_count": state.research_findings.len(),
            }),
            insufficient_topics: Vec::new(),
        })
    }

    fn schema(&self) -> PayloadSchema {
        draft_schema("draft-v1")
    }

    fn parse_output(
        &self,
        state: &mut WorkflowState,
        _input: &PhaseInput,
        content: &Value,
    ) -> QuireResult<Value> {
        let draft: Draft = decode(self.stage(), content)?;
        let sections = draft.sections.clone();
        state.apply_draft(draft);
        Ok(json!({
            "sections": sections,
            "citation_count": state.citation_count,
            "draft_version": state.draft_version,
        }))
    }
}

// ── Critique ──────────────────────────────────────────────────────────────────

pub struct CritiquePhase;

impl PhaseHandler for CritiquePhase {
    fn stage(&self) -> StageKind {
        StageKind::Critic
    }

    fn tool(&self) -> &'static str {
        "critique"
    }

    fn action(&self) -> &'static str {
        "critique"
    }

    fn build_input(&self, state: &WorkflowState, _env: &PhaseEnv<'_>) -> QuireResult<PhaseInput> {
        Ok(PhaseInput {
            stage: stage_input(
                self.stage(),
                self.action(),
                json!({
                    "draft": state.draft,
                    "draft_version": state.draft_version,
                    "requirements": requirements(state),
                    "findings": state.research_findings,
                }),
            ),
            trace_input: json!({ "draft_version": state.draft_version }),
            insufficient_topics: Vec::new(),
        })
    }

    fn schema(&self) -> PayloadSchema {
        PayloadSchema {
            schema_id: "critique-v1".to_string(),
            json_schema: json!({
                "type": "object",
                "required": ["revision_needed"],
                "properties": {
                    "overall_score": { "type": "integer", "minimum": 0, "maximum": 100 },
                    "revision_needed": { "type": "boolean" },
                    "approved": { "type": "boolean" },
                    "issues": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "severity": { "enum": ["high", "medium", "low"] }
                            }
                        }
                    }
                }
            }),
            rules: vec![required("critique-decision", "revision_needed")],
        }
    }

    fn parse_output(
        &self,
        state: &mut WorkflowState,
        _input: &PhaseInput,
        content: &Value,
    ) -> QuireResult<Value> {
        let critique: Critique = decode(self.stage(), content)?;
        debug!(
            run_id = %state.run_id,
            score = critique.overall_score,
            revision_needed = critique.revision_needed,
            "critique parsed"
        );
        state.apply_critique(critique);
        Ok(content.clone())
    }
}

// ── Revise ────────────────────────────────────────────────────────────────────

pub struct RevisePhase;

impl PhaseHandler for RevisePhase {
    fn stage(&self) -> StageKind {
        StageKind::Writer
    }

    fn tool(&self) -> &'static str {
        "revise_draft"
    }

    fn action(&self) -> &'static str {
        "revise_draft"
    }

    fn build_input(&self, state: &WorkflowState, _env: &PhaseEnv<'_>) -> QuireResult<PhaseInput> {
        let instructions = state
            .critique
            .as_ref()
            .map(|c| c.revision_instructions())
            .unwrap_or_default();
        Ok(PhaseInput {
            stage: stage_input(
                self.stage(),
                self.action(),
                json!({
                    "draft": state.draft,
                    "draft_version": state.draft_version,
                    "instructions": instructions,
                    "requirements": requirements(state),
                }),
            ),
            trace_input: json!({
                "original_version": state.draft_version,
                "instruction_count": instructions.len(),
            }),
            insufficient_topics: Vec::new(),
        })
    }

    fn schema(&self) -> PayloadSchema {
        draft_schema("revision-v1")
    }

    fn parse_output(
        &self,
        state: &mut WorkflowState,
        _input: &PhaseInput,
        content: &Value,
    ) -> QuireResult<Value> {
        let draft: Draft = decode(self.stage(), content)?;
        state.apply_draft(draft);
        Ok(json!({
            "new_version": state.draft_version,
            "citation_count": state.citation_count,
        }))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
