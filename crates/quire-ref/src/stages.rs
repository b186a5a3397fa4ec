//! Deterministic reference stage executors.
//!
//! These stand in for model-backed stages. Each reads the payload the
//! coordinator built for its action and answers with JSON in the shape the
//! phase schema expects. Same input, same output.

use serde_json::{json, Value};
use tracing::debug;

use quire_contracts::{
    error::{QuireError, QuireResult},
    stage::{
        CritiqueIssue, IssueSeverity, ResearchFinding, RetrievalResult, StageInput, StageKind,
        StageResponse,
    },
};
use quire_core::traits::StageExecutor;

/// Topics every plan covers.
const BASE_TOPICS: &[&str] = &["pricing", "features", "support"];

/// Request words that add the security topic.
const SECURITY_WORDS: &[&str] = &["security", "compliance", "soc"];

const CITATION_OPEN: &str = "[Source:";
const OPEN_QUESTIONS: &str = "## Open Questions";

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn unsupported(kind: StageKind, action: &str) -> QuireResult<StageResponse> {
    Ok(StageResponse::failed(format!(
        "{} cannot handle action '{}'",
        kind, action
    )))
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ── Planner ───────────────────────────────────────────────────────────────────

/// Plans the base topics, plus security when the request asks for it.
///
/// On a replan the input carries `missing_info`; each gap becomes a
/// follow-up question.
pub struct ReferencePlanner;

impl StageExecutor for ReferencePlanner {
    fn kind(&self) -> StageKind {
        StageKind::Planner
    }

    fn execute(&self, input: &StageInput) -> QuireResult<StageResponse> {
        if input.action != "create_plan" {
            return unsupported(self.kind(), &input.action);
        }
        let request = input.payload["request"].as_str().unwrap_or("");
        let missing = string_list(&input.payload["missing_info"]);

        let lowered = request.to_lowercase();
        let mut topics: Vec<&str> = BASE_TOPICS.to_vec();
        if SECURITY_WORDS.iter().any(|w| lowered.contains(w)) {
            topics.push("security");
        }

        let tasks: Vec<Value> = topics
            .iter()
            .enumerate()
            .map(|(i, topic)| {
                let priority = if i == 0 { "high" } else { "medium" };
                json!({
                    "id": i + 1,
                    "description": format!("Gather {} details", topic),
                    "priority": priority,
                    "required_info": [topic],
                })
            })
            .collect();
        let questions: Vec<String> = missing
            .iter()
            .map(|m| format!("Can you share more detail on {}?", m))
            .collect();

        debug!(topics = topics.len(), questions = questions.len(), "reference plan built");

        Ok(StageResponse::ok(json!({
            "summary": format!("Proposal plan for: {}", request),
            "requirements": topics.iter().map(|t| title_case(t)).collect::<Vec<_>>(),
            "tasks": tasks,
            "questions": questions,
        })))
    }
}

// ── Researcher ────────────────────────────────────────────────────────────────

/// Turns the best document of each retrieval into a finding.
///
/// Topics whose retrieval was insufficient are reported as missing. With no
/// documents at all the report is insufficient and has no findings.
pub struct ReferenceResearcher;

impl StageExecutor for ReferenceResearcher {
    fn kind(&self) -> StageKind {
        StageKind::Researcher
    }

    fn execute(&self, input: &StageInput) -> QuireResult<StageResponse> {
        if input.action != "research" {
            return unsupported(self.kind(), &input.action);
        }
        let retrieved: Vec<RetrievalResult> =
            serde_json::from_value(input.payload["retrieved"].clone()).map_err(|e| {
                QuireError::stage(self.kind().as_str(), format!("unreadable retrievals: {}", e))
            })?;

        let mut findings = Vec::new();
        let mut missing_info = Vec::new();
        for result in &retrieved {
            if let Some(best) = result.results.first() {
                findings.push(ResearchFinding {
                    topic: result.query.clone(),
                    content: best.content.clone(),
                    source: best.source.clone(),
                    relevance_score: best.score,
                    is_sufficient: result.sufficient,
                });
            }
            if !result.sufficient {
                missing_info.push(result.query.clone());
            }
        }
        let overall_sufficient = missing_info.is_empty() && !findings.is_empty();

        Ok(StageResponse::ok(json!({
            "summary": format!("{} of {} topics covered", findings.len(), retrieved.len()),
            "findings": findings,
            "missing_info": missing_info,
            "overall_sufficient": overall_sufficient,
        })))
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Writes a markdown proposal with one cited section per finding, and
/// revises by appending the critique's instructions as revision notes.
pub struct ReferenceWriter;

impl ReferenceWriter {
    fn write_draft(&self, payload: &Value) -> QuireResult<StageResponse> {
        let findings: Vec<ResearchFinding> = serde_json::from_value(payload["findings"].clone())
            .map_err(|e| QuireError::stage(self.kind().as_str(), format!("unreadable findings: {}", e)))?;
        let requirements = string_list(&payload["requirements"]);
        let missing = string_list(&payload["missing_info"]);
        let customer = match payload["customer_context"].as_str() {
            Some(c) if !c.trim().is_empty() => c,
            _ => "our customer",
        };

        let mut md = String::from("# Proposal\n\n## Overview\n");
        md.push_str(&format!("Prepared for {}.", customer));
        if !requirements.is_empty() {
            md.push_str(&format!(" This proposal covers {}.", requirements.join(", ")));
        }
        md.push('\n');

        for finding in &findings {
            md.push_str(&format!(
                "\n## {}\n{} [Source: {}]\n",
                title_case(&finding.topic),
                finding.content,
                finding.source
            ));
        }

        if !missing.is_empty() {
            md.push_str(&format!("\n{}\n", OPEN_QUESTIONS));
            for item in &missing {
                md.push_str(&format!("- {}\n", item));
            }
        }

        Ok(StageResponse::ok(draft_payload(md)))
    }

    fn revise_draft(&self, payload: &Value) -> QuireResult<StageResponse> {
        let draft = payload["draft"].as_str().unwrap_or("");
        if draft.is_empty() {
            return Ok(StageResponse::failed("nothing to revise: draft is empty"));
        }
        let version = payload["draft_version"].as_u64().unwrap_or(0);
        let instructions = string_list(&payload["instructions"]);

        let mut md = draft.trim_end().to_string();
        md.push_str(&format!("\n\n## Revision {} Notes\n", version + 1));
        if instructions.is_empty() {
            md.push_str("- Tightened wording\n");
        }
        for instruction in &instructions {
            md.push_str(&format!("- Addressed: {}\n", instruction));
        }

        Ok(StageResponse::ok(draft_payload(md)))
    }
}

impl StageExecutor for ReferenceWriter {
    fn kind(&self) -> StageKind {
        StageKind::Writer
    }

    fn execute(&self, input: &StageInput) -> QuireResult<StageResponse> {
        match input.action.as_str() {
            "write_draft" => self.write_draft(&input.payload),
            "revise_draft" => self.revise_draft(&input.payload),
            other => unsupported(self.kind(), other),
        }
    }
}

/// `{content, sections, citation_count}` for a markdown draft.
///
/// Sections are the `##` headings, preceded by the `#` title.
fn draft_payload(content: String) -> Value {
    let mut sections = Vec::new();
    for line in content.lines() {
        if let Some(title) = line.strip_prefix("# ") {
            if sections.is_empty() {
                sections.push(title.trim().to_string());
            }
        } else if let Some(heading) = line.strip_prefix("## ") {
            sections.push(heading.trim().to_string());
        }
    }
    let citation_count = content.matches(CITATION_OPEN).count();
    json!({
        "content": content,
        "sections": sections,
        "citation_count": citation_count,
    })
}

// ── Critic ────────────────────────────────────────────────────────────────────

/// Scores a draft on its citations and open questions.
///
/// A draft scoring below `pass_score` needs revision.
pub struct ReferenceCritic {
    pass_score: u32,
}

impl ReferenceCritic {
    pub fn new() -> Self {
        Self { pass_score: 70 }
    }

    /// A critic no draft can satisfy.
    pub fn strict() -> Self {
        Self { pass_score: 101 }
    }

    pub fn with_pass_score(pass_score: u32) -> Self {
        Self { pass_score }
    }
}

impl Default for ReferenceCritic {
    fn default() -> Self {
        Self::new()
    }
}

impl StageExecutor for ReferenceCritic {
    fn kind(&self) -> StageKind {
        StageKind::Critic
    }

    fn execute(&self, input: &StageInput) -> QuireResult<StageResponse> {
        if input.action != "critique" {
            return unsupported(self.kind(), &input.action);
        }
        let draft = input.payload["draft"].as_str().unwrap_or("");
        let findings: Vec<ResearchFinding> =
            serde_json::from_value(input.payload["findings"].clone()).unwrap_or_default();
        let sources: Vec<&str> = findings.iter().map(|f| f.source.as_str()).collect();

        let mut verified = Vec::new();
        let mut unverified = Vec::new();
        for citation in citations(draft) {
            if sources.iter().any(|s| *s == citation) {
                verified.push(citation);
            } else {
                unverified.push(citation);
            }
        }

        let mut issues = Vec::new();
        if verified.is_empty() && unverified.is_empty() {
            issues.push(CritiqueIssue {
                kind: "accuracy".to_string(),
                severity: IssueSeverity::High,
                location: "Whole draft".to_string(),
                description: "No claim cites a source".to_string(),
                suggestion: "Cite the research findings".to_string(),
            });
        }
        for citation in &unverified {
            issues.push(CritiqueIssue {
                kind: "accuracy".to_string(),
                severity: IssueSeverity::Medium,
                location: format!("[Source: {}]", citation),
                description: "Cited source is not among the research findings".to_string(),
                suggestion: "Replace it with a researched source".to_string(),
            });
        }
        if draft.contains(OPEN_QUESTIONS) {
            issues.push(CritiqueIssue {
                kind: "completeness".to_string(),
                severity: IssueSeverity::Medium,
                location: "Open Questions".to_string(),
                description: "Some requirements are still unanswered".to_string(),
                suggestion: "Confirm the open items with the customer".to_string(),
            });
        }

        let penalty: u32 = issues
            .iter()
            .map(|i| match i.severity {
                IssueSeverity::High => 30,
                IssueSeverity::Medium => 10,
                IssueSeverity::Low => 5,
            })
            .sum();
        let overall_score = 95u32.saturating_sub(penalty);
        let revision_needed = overall_score < self.pass_score;

        Ok(StageResponse::ok(json!({
            "overall_score": overall_score,
            "issues": issues,
            "verified_claims": verified,
            "unverified_claims": unverified,
            "summary": format!("{} issue(s), score {}", issues.len(), overall_score),
            "approved": !revision_needed,
            "revision_needed": revision_needed,
        })))
    }
}

/// The source names inside every `[Source: ...]` marker, in order.
fn citations(draft: &str) -> Vec<String> {
    draft
        .match_indices(CITATION_OPEN)
        .filter_map(|(start, _)| {
            let rest = &draft[start + CITATION_OPEN.len()..];
            rest.find(']').map(|end| rest[..end].trim().to_string())
        })
        .collect()
}
