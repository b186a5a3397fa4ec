//! Stage executor contract and the typed payloads merged into state.
//!
//! Stage executors are external collaborators: they receive a `StageInput`
//! and answer with a `StageResponse` whose `content` is opaque JSON. The
//! coordinator verifies that JSON and only then deserializes it into one of
//! the payload structs below.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The four stage executor roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Planner,
    Researcher,
    Writer,
    Critic,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Planner => "planner",
            StageKind::Researcher => "researcher",
            StageKind::Writer => "writer",
            StageKind::Critic => "critic",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request handed to a stage executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageInput {
    /// Which role is being asked.
    pub stage: StageKind,
    /// What the role is asked to do (e.g. "create_plan", "revise_draft").
    pub action: String,
    /// Action-specific arguments built from the current state.
    pub payload: serde_json::Value,
}

/// The answer from a stage executor: `{success, content, error?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResponse {
    pub success: bool,
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageResponse {
    pub fn ok(content: serde_json::Value) -> Self {
        Self {
            success: true,
            content,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

// ── Planner ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanTask {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: String,
    /// Topics the researcher must look up for this task.
    #[serde(default)]
    pub required_info: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
    /// Follow-up questions, typically produced when research came back empty.
    #[serde(default)]
    pub questions: Vec<String>,
}

impl Plan {
    /// Topics to research: every task's `required_info`, falling back to
    /// the requirements and finally to a generic product topic.
    pub fn search_topics(&self) -> Vec<String> {
        let from_tasks: Vec<String> = self
            .tasks
            .iter()
            .flat_map(|t| t.required_info.iter().cloned())
            .collect();
        if !from_tasks.is_empty() {
            return from_tasks;
        }
        if !self.requirements.is_empty() {
            return self.requirements.clone();
        }
        vec!["Product Information".to_string()]
    }
}

// ── Researcher ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchFinding {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub is_sufficient: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    #[serde(default)]
    pub findings: Vec<ResearchFinding>,
    #[serde(default)]
    pub missing_info: Vec<String>,
    #[serde(default)]
    pub summary: String,
    pub overall_sufficient: bool,
}

/// One document returned by the retrieval collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub source: String,
    pub content: String,
    pub score: f64,
}

/// Result of `Retriever::retrieve(topic)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub results: Vec<RetrievedDocument>,
    pub sufficient: bool,
}

// ── Writer ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub content: String,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub citation_count: u32,
}

// ── Critic ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CritiqueIssue {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub severity: IssueSeverity,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    #[serde(default)]
    pub overall_score: u32,
    #[serde(default)]
    pub issues: Vec<CritiqueIssue>,
    #[serde(default)]
    pub verified_claims: Vec<String>,
    #[serde(default)]
    pub unverified_claims: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub approved: bool,
    pub revision_needed: bool,
}

impl Critique {
    /// Turn the critique into writer instructions, most severe issues first.
    pub fn revision_instructions(&self) -> Vec<String> {
        let mut issues: Vec<&CritiqueIssue> = self.issues.iter().collect();
        issues.sort_by_key(|i| i.severity);

        let mut out: Vec<String> = issues
            .iter()
            .map(|i| {
                if i.suggestion.is_empty() {
                    format!("[{:?}] {}: {}", i.severity, i.location, i.description)
                } else {
                    format!(
                        "[{:?}] {}: {} -> {}",
                        i.severity, i.location, i.description, i.suggestion
                    )
                }
            })
            .collect();
        for claim in &self.unverified_claims {
            out.push(format!("Support or remove unverified claim: {claim}"));
        }
        out
    }
}
