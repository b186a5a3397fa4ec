//! Human-readable per-run artifacts.
//!
//! These mirror whatever the state holds at save time. They are a reading
//! aid only; `state.json` is the one file the store loads back.

use chrono::Utc;
use serde_json::json;

use quire_contracts::{
    run::{WorkflowState, WorkflowStatus},
    stage::{Critique, IssueSeverity},
};

/// One artifact file: name inside the run directory and full contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: String,
    pub contents: String,
}

impl Artifact {
    fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }
}

/// Every artifact the state currently supports, in a fixed order.
pub fn render(state: &WorkflowState) -> serde_json::Result<Vec<Artifact>> {
    let mut out = Vec::new();

    if let Some(plan) = &state.plan {
        out.push(Artifact::new("plan.json", serde_json::to_string_pretty(plan)?));
    }

    if !state.research_findings.is_empty() {
        let retrieved = json!({
            "findings": state.research_findings,
            "count": state.research_findings.len(),
        });
        out.push(Artifact::new(
            "retrieved.json",
            serde_json::to_string_pretty(&retrieved)?,
        ));
    }

    if !state.draft.is_empty() {
        out.push(Artifact::new(
            "draft.md",
            format!(
                "<!-- Draft Version: {} -->\n<!-- Updated: {} -->\n\n{}",
                state.draft_version,
                state.updated_at.to_rfc3339(),
                state.draft
            ),
        ));
        out.push(Artifact::new(
            format!("draft_v{}.md", state.draft_version),
            state.draft.clone(),
        ));
    }

    if let Some(critique) = &state.critique {
        out.push(Artifact::new("critique.md", critique_markdown(critique)));
        out.push(Artifact::new(
            "critique.json",
            serde_json::to_string_pretty(critique)?,
        ));
    }

    if state.status == WorkflowStatus::Completed && state.approved && !state.final_draft.is_empty() {
        let approved_at = state.approval_timestamp.unwrap_or_else(Utc::now);
        out.push(Artifact::new(
            "final.md",
            format!(
                "<!-- Final Version -->\n<!-- Approved: {} -->\n\n{}",
                approved_at.to_rfc3339(),
                state.final_draft
            ),
        ));
    }

    Ok(out)
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

fn severity_tag(severity: IssueSeverity) -> &'static str {
    match severity {
        IssueSeverity::High => "[HIGH]",
        IssueSeverity::Medium => "[MEDIUM]",
        IssueSeverity::Low => "[LOW]",
    }
}

fn or_unknown(s: &str) -> &str {
    if s.is_empty() {
        "Unknown"
    } else {
        s
    }
}

pub fn critique_markdown(critique: &Critique) -> String {
    let mut md = String::from("# Critique Report\n\n");
    md.push_str(&format!("**Score**: {}/100\n", critique.overall_score));
    md.push_str(&format!("**Approved**: {}\n", yes_no(critique.approved)));
    md.push_str(&format!(
        "**Revision Needed**: {}\n",
        yes_no(critique.revision_needed)
    ));

    if !critique.summary.is_empty() {
        md.push_str(&format!("\n## Summary\n{}\n", critique.summary));
    }

    if !critique.issues.is_empty() {
        md.push_str("\n## Issues\n");
        for issue in &critique.issues {
            md.push_str(&format!(
                "### {} {}\n",
                severity_tag(issue.severity),
                or_unknown(&issue.location)
            ));
            md.push_str(&format!("- **Type**: {}\n", or_unknown(&issue.kind)));
            md.push_str(&format!("- **Description**: {}\n", issue.description));
            md.push_str(&format!("- **Suggestion**: {}\n", issue.suggestion));
        }
    }

    for (title, claims) in [
        ("Verified Claims", &critique.verified_claims),
        ("Unverified Claims", &critique.unverified_claims),
    ] {
        if !claims.is_empty() {
            md.push_str(&format!("\n## {}\n", title));
            for claim in claims {
                md.push_str(&format!("- {}\n", claim));
            }
        }
    }

    md
}
