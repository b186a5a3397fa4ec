//! # quire-store
//!
//! Persistence collaborators for the quire coordinator.
//!
//! - [`FileStateStore`] keeps each run under `<runs_dir>/<run_id>/`: an
//!   atomically replaced `state.json` plus human-readable artifacts
//!   (`plan.json`, `draft.md`, `critique.md`, `final.md`, ...).
//! - [`MemoryStateStore`] keeps runs in a map for tests and embedding.

pub mod artifacts;
pub mod file;
pub mod memory;

pub use file::{FileStateStore, RunSummary, FINAL_FILE, STATE_FILE};
pub use memory::MemoryStateStore;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    use quire_contracts::{
        error::QuireError,
        run::{RunId, WorkflowState, WorkflowStatus},
        stage::{Critique, CritiqueIssue, IssueSeverity, Plan, PlanTask, ResearchFinding},
    };
    use quire_core::traits::StateStore;

    use super::*;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn state(id: &str) -> WorkflowState {
        WorkflowState::new("Proposal for ACME", "retail", Some(RunId::from(id)), 20)
    }

    fn populated(id: &str) -> WorkflowState {
        let mut s = state(id);
        s.status = WorkflowStatus::Critiquing;
        s.plan = Some(Plan {
            summary: "proposal plan".to_string(),
            requirements: vec!["pricing".to_string()],
            tasks: vec![PlanTask {
                id: 1,
                description: "collect pricing".to_string(),
                priority: "high".to_string(),
                required_info: vec!["pricing".to_string()],
            }],
            questions: vec![],
        });
        s.research_findings = vec![ResearchFinding {
            topic: "pricing".to_string(),
            content: "Starter plan is 50/user".to_string(),
            source: "pricing.md".to_string(),
            relevance_score: 0.8,
            is_sufficient: true,
        }];
        s.draft = "# Proposal\nBody".to_string();
        s.draft_version = 2;
        s.critique = Some(Critique {
            overall_score: 72,
            issues: vec![CritiqueIssue {
                kind: "accuracy".to_string(),
                severity: IssueSeverity::High,
                location: "Pricing".to_string(),
                description: "price unsupported".to_string(),
                suggestion: "cite pricing.md".to_string(),
            }],
            verified_claims: vec!["Starter plan".to_string()],
            unverified_claims: vec![],
            summary: "close".to_string(),
            approved: false,
            revision_needed: true,
        });
        s
    }

    // ── FileStateStore ────────────────────────────────────────────────────────

    #[test]
    fn test_save_then_load_roundtrips_state() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let s = populated("r1");

        store.save(&s).unwrap();
        let loaded = store.load(&s.run_id).unwrap();

        assert_eq!(loaded, Some(s));
        assert!(!dir.path().join("r1").join("state.json.tmp").exists());
    }

    #[test]
    fn test_load_unknown_run_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        assert_eq!(store.load(&RunId::from("ghost")).unwrap(), None);
    }

    #[test]
    fn test_corrupt_state_is_store_error() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("bad")).unwrap();
        fs::write(dir.path().join("bad").join(STATE_FILE), "{ not json").unwrap();
        let store = FileStateStore::new(dir.path());

        match store.load(&RunId::from("bad")) {
            Err(QuireError::StoreFailed { reason }) => assert!(reason.contains("state.json")),
            other => panic!("expected StoreFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_artifacts_follow_state() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let s = populated("r1");
        store.save(&s).unwrap();

        let run = dir.path().join("r1");
        for name in ["plan.json", "retrieved.json", "draft.md", "draft_v2.md", "critique.md", "critique.json"] {
            assert!(run.join(name).exists(), "{} should exist", name);
        }
        assert!(!run.join(FINAL_FILE).exists(), "final.md waits for completion");

        let retrieved: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(run.join("retrieved.json")).unwrap()).unwrap();
        assert_eq!(retrieved["count"], 1);

        let draft = fs::read_to_string(run.join("draft.md")).unwrap();
        assert!(draft.starts_with("<!-- Draft Version: 2 -->"));
        assert_eq!(fs::read_to_string(run.join("draft_v2.md")).unwrap(), s.draft);

        let critique = fs::read_to_string(run.join("critique.md")).unwrap();
        assert!(critique.contains("**Score**: 72/100"));
        assert!(critique.contains("### [HIGH] Pricing"));
        assert!(critique.contains("## Verified Claims"));
        assert!(!critique.contains("## Unverified Claims"));
    }

    #[test]
    fn test_final_written_only_when_completed_and_approved() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let mut s = populated("r1");
        s.final_draft = s.draft.clone();
        s.approved = true;
        s.status = WorkflowStatus::Approved;
        store.save(&s).unwrap();
        assert!(!dir.path().join("r1").join(FINAL_FILE).exists());

        s.status = WorkflowStatus::Completed;
        store.save(&s).unwrap();
        let fin = fs::read_to_string(dir.path().join("r1").join(FINAL_FILE)).unwrap();
        assert!(fin.starts_with("<!-- Final Version -->"));
        assert!(fin.ends_with("Body"));
    }

    #[test]
    fn test_list_runs_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());

        let mut old = state("old");
        old.created_at = Utc::now() - Duration::hours(2);
        let mut done = populated("done");
        done.created_at = Utc::now() - Duration::hours(1);
        done.status = WorkflowStatus::Completed;
        done.approved = true;
        done.final_draft = "final".to_string();
        let new = state("new");
        for s in [&old, &done, &new] {
            store.save(s).unwrap();
        }
        fs::create_dir_all(dir.path().join("orphan")).unwrap();
        fs::create_dir_all(dir.path().join(".hidden")).unwrap();

        let runs = store.list_runs().unwrap();
        let ids: Vec<&str> = runs.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["new", "done", "old", "orphan"]);

        assert!(runs[1].approved && runs[1].has_final);
        assert_eq!(runs[1].status, Some(WorkflowStatus::Completed));
        assert_eq!(runs[3].status, None);
    }

    #[test]
    fn test_list_runs_without_runs_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path().join("missing"));
        assert!(store.list_runs().unwrap().is_empty());
    }

    #[test]
    fn test_delete_run() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        let s = populated("r1");
        store.save(&s).unwrap();

        assert!(store.delete_run(&s.run_id).unwrap());
        assert!(!dir.path().join("r1").exists());
        assert!(!store.delete_run(&s.run_id).unwrap());
    }

    #[test]
    fn test_location_and_unsafe_ids() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::new(dir.path());
        assert_eq!(store.location(&RunId::from("r1")), Some(dir.path().join("r1")));
        assert_eq!(store.location(&RunId::from("../up")), None);

        match store.save(&state("../up")) {
            Err(QuireError::StoreFailed { .. }) => {}
            other => panic!("expected StoreFailed, got {:?}", other),
        }
    }

    // ── MemoryStateStore ──────────────────────────────────────────────────────

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStateStore::new();
        let mut s = state("m1");
        store.save(&s).unwrap();
        s.current_step = 4;
        store.save(&s).unwrap();
        store.save(&state("m0")).unwrap();

        assert_eq!(store.load(&RunId::from("m1")).unwrap().unwrap().current_step, 4);
        assert_eq!(store.run_ids(), vec![RunId::from("m0"), RunId::from("m1")]);
        assert_eq!(store.location(&RunId::from("m1")), None);
        assert!(store.remove(&RunId::from("m0")));
        assert_eq!(store.load(&RunId::from("m0")).unwrap(), None);
    }
}
