//! # quire-contracts
//!
//! Shared types, payloads, and error contracts for the quire run coordinator.
//!
//! Every crate in the workspace imports from here. No orchestration logic
//! lives in this crate; only data definitions, their invariants, and errors.

pub mod approval;
pub mod config;
pub mod error;
pub mod execution;
pub mod run;
pub mod stage;
pub mod trace;
pub mod verify;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use error::{GuardrailViolation, QuireError};
    use execution::Phase;
    use run::{RunId, WorkflowState, WorkflowStatus};
    use stage::{Critique, CritiqueIssue, Draft, IssueSeverity, Plan, PlanTask, ResearchReport};
    use trace::TraceRecord;

    fn make_state() -> WorkflowState {
        WorkflowState::new("proposal for ACME", "mid-size retailer", Some(RunId::from("run-1")), 5)
    }

    fn entry(step: u32) -> trace::TraceEntry {
        TraceRecord {
            run_id: RunId::from("run-1"),
            step,
            agent: "planner".to_string(),
            action: "create_plan".to_string(),
            input: json!({}),
            output: json!({}),
            success: true,
            error: None,
            duration_ms: None,
        }
        .into_entry()
    }

    // ── RunId ────────────────────────────────────────────────────────────────

    #[test]
    fn run_id_generate_is_short_and_unique() {
        let ids: std::collections::HashSet<String> =
            (0..100).map(|_| RunId::generate().0).collect();
        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| id.len() == 8));
    }

    #[test]
    fn run_id_path_safety() {
        assert!(RunId::generate().is_path_safe());
        assert!(RunId::from("run-1").is_path_safe());
        for bad in ["", ".", "..", "../etc", "a/b", "a\\b"] {
            assert!(!RunId::from(bad).is_path_safe(), "{:?} should be rejected", bad);
        }
    }

    // ── WorkflowStatus edges ─────────────────────────────────────────────────

    #[test]
    fn happy_path_edges_are_allowed() {
        use WorkflowStatus::*;
        let path = [
            Pending, Planning, Researching, Writing, Critiquing, Revising, Critiquing,
            AwaitingApproval, Approved, Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use WorkflowStatus::*;
        for next in [Pending, Planning, Approved, Completed, Failed] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn skipping_phases_is_rejected() {
        use WorkflowStatus::*;
        assert!(!Pending.can_transition_to(Writing));
        assert!(!Writing.can_transition_to(AwaitingApproval));
        assert!(!AwaitingApproval.can_transition_to(Completed));
        assert!(!Revising.can_transition_to(AwaitingApproval));
    }

    #[test]
    fn failed_is_reachable_from_every_working_state() {
        use WorkflowStatus::*;
        for from in [
            Pending, Planning, Researching, Writing, Critiquing, Revising, AwaitingApproval,
            Approved,
        ] {
            assert!(from.can_transition_to(Failed), "{from} -> failed");
        }
    }

    #[test]
    fn status_for_phase_mapping() {
        assert_eq!(WorkflowStatus::for_phase(Phase::Plan), WorkflowStatus::Planning);
        assert_eq!(
            WorkflowStatus::for_phase(Phase::RequestApproval),
            WorkflowStatus::AwaitingApproval
        );
        assert_eq!(WorkflowStatus::for_phase(Phase::Finalize), WorkflowStatus::Completed);
    }

    // ── WorkflowState invariants ─────────────────────────────────────────────

    #[test]
    fn transition_rejects_illegal_edge() {
        let mut state = make_state();
        let err = state.transition(WorkflowStatus::Writing).unwrap_err();
        assert!(matches!(err, QuireError::StateMachineError { .. }));
        assert_eq!(state.status, WorkflowStatus::Pending);
    }

    #[test]
    fn advance_step_is_monotonic_and_bounded() {
        let mut state = make_state();
        state.advance_step(1).unwrap();
        state.advance_step(2).unwrap();
        assert!(state.advance_step(2).is_err());
        assert!(state.advance_step(6).is_err(), "max_steps is 5");
        assert_eq!(state.current_step, 2);
    }

    #[test]
    fn record_trace_requires_increasing_steps() {
        let mut state = make_state();
        state.record_trace(entry(1)).unwrap();
        state.record_trace(entry(2)).unwrap();
        assert!(state.record_trace(entry(2)).is_err());
        assert_eq!(state.trace.len(), 2);
    }

    #[test]
    fn record_trace_rejects_foreign_run() {
        let mut state = make_state();
        let mut foreign = entry(1);
        foreign.run_id = RunId::from("other");
        assert!(state.record_trace(foreign).is_err());
    }

    #[test]
    fn draft_version_increments_by_one() {
        let mut state = make_state();
        for expected in 1..=3 {
            state.apply_draft(Draft {
                content: format!("v{expected}"),
                sections: vec![],
                citation_count: 2,
            });
            assert_eq!(state.draft_version, expected);
        }
        assert_eq!(state.draft, "v3");
    }

    #[test]
    fn research_insufficient_topics_are_recorded() {
        let mut state = make_state();
        let report = ResearchReport {
            findings: vec![],
            missing_info: vec!["Pricing".to_string()],
            summary: String::new(),
            overall_sufficient: true,
        };
        state.apply_research(report, &["Pricing".to_string(), "ROI".to_string()]);
        assert!(!state.research_sufficient);
        assert_eq!(state.missing_info, vec!["Pricing".to_string(), "ROI".to_string()]);
    }

    #[test]
    fn fail_does_not_override_completed() {
        let mut state = make_state();
        state.status = WorkflowStatus::Approved;
        state.draft = "final text".to_string();
        state.complete().unwrap();
        state.fail("late fault");
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.final_draft, "final text");
        assert!(state.error.is_none());
    }

    #[test]
    fn mark_approved_requires_awaiting_approval() {
        let mut state = make_state();
        assert!(state.mark_approved(Utc::now()).is_err());

        state.status = WorkflowStatus::AwaitingApproval;
        state.mark_approved(Utc::now()).unwrap();
        assert!(state.approved);
        assert_eq!(state.status, WorkflowStatus::Approved);
        assert!(state.approval_timestamp.is_some());
    }

    #[test]
    fn state_survives_json_document_round_trip() {
        let mut state = make_state();
        state.record_trace(entry(1)).unwrap();
        state.apply_plan(Plan {
            summary: "plan".to_string(),
            requirements: vec!["pricing".to_string()],
            tasks: vec![],
            questions: vec![],
        });
        let doc = serde_json::to_string_pretty(&state).unwrap();
        let back: WorkflowState = serde_json::from_str(&doc).unwrap();
        assert_eq!(back, state);
        assert!(doc.contains("\"status\": \"pending\""));
    }

    // ── Stage payloads ───────────────────────────────────────────────────────

    #[test]
    fn search_topics_fall_back_in_order() {
        let mut plan = Plan::default();
        assert_eq!(plan.search_topics(), vec!["Product Information".to_string()]);

        plan.requirements = vec!["Pricing".to_string()];
        assert_eq!(plan.search_topics(), vec!["Pricing".to_string()]);

        plan.tasks = vec![PlanTask {
            id: 1,
            description: "research".to_string(),
            priority: "high".to_string(),
            required_info: vec!["Features".to_string(), "Specs".to_string()],
        }];
        assert_eq!(plan.search_topics(), vec!["Features".to_string(), "Specs".to_string()]);
    }

    #[test]
    fn revision_instructions_put_high_severity_first() {
        let critique = Critique {
            issues: vec![
                CritiqueIssue {
                    severity: IssueSeverity::Low,
                    location: "Next Steps".to_string(),
                    description: "no schedule".to_string(),
                    ..Default::default()
                },
                CritiqueIssue {
                    severity: IssueSeverity::High,
                    location: "Pricing".to_string(),
                    description: "wrong price".to_string(),
                    suggestion: "cite pricing.md".to_string(),
                    ..Default::default()
                },
            ],
            unverified_claims: vec!["35% saving".to_string()],
            revision_needed: true,
            ..Default::default()
        };
        let instructions = critique.revision_instructions();
        assert_eq!(instructions.len(), 3);
        assert!(instructions[0].contains("Pricing"));
        assert!(instructions[0].contains("cite pricing.md"));
        assert!(instructions[2].contains("35% saving"));
    }

    #[test]
    fn critique_requires_revision_flag() {
        let missing = serde_json::from_value::<Critique>(json!({ "overall_score": 70 }));
        assert!(missing.is_err());
        let ok: Critique =
            serde_json::from_value(json!({ "revision_needed": false, "issues": [{"type": "tone"}] }))
                .unwrap();
        assert_eq!(ok.issues[0].kind, "tone");
        assert_eq!(ok.issues[0].severity, IssueSeverity::Medium);
    }

    // ── Errors ───────────────────────────────────────────────────────────────

    #[test]
    fn guardrail_tool_violation_names_tool_and_allowlist() {
        let err = QuireError::from(GuardrailViolation::ToolNotAllowed {
            tool: "shell".to_string(),
            allowed: vec!["plan".to_string(), "retrieve".to_string()],
        });
        let msg = err.to_string();
        assert!(msg.starts_with("guardrail violation"));
        assert!(msg.contains("shell"));
        assert!(msg.contains("plan, retrieve"));
    }

    #[test]
    fn guardrail_path_violation_names_path_and_roots() {
        let v = GuardrailViolation::WritePathNotAllowed {
            path: PathBuf::from("/etc/passwd"),
            allowed_roots: vec![PathBuf::from("/srv/runs")],
        };
        let msg = v.to_string();
        assert!(msg.contains("/etc/passwd"));
        assert!(msg.contains("/srv/runs"));
    }

    #[test]
    fn stage_error_display() {
        let msg = QuireError::stage("planner", "model timed out").to_string();
        assert!(msg.contains("stage 'planner' failed"));
        assert!(msg.contains("model timed out"));
    }
}
