//! Human approval records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

/// One outstanding (or resolved) approval decision for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub run_id: RunId,
    /// Snapshot of the draft awaiting sign-off.
    pub content: String,
    /// Extra material shown to the approver (requirements, score, version).
    pub context: serde_json::Value,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolver: Option<String>,
    pub comments: Option<String>,
}

impl ApprovalRequest {
    /// A fresh pending request.
    pub fn pending(run_id: RunId, content: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            run_id,
            content: content.into(),
            context,
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            resolver: None,
            comments: None,
        }
    }

    /// Record a decision on this request.
    pub fn resolve(&mut self, status: ApprovalStatus, resolver: &str, comments: Option<&str>) {
        self.status = status;
        self.resolved_at = Some(Utc::now());
        self.resolver = Some(resolver.to_string());
        self.comments = comments.map(str::to_string);
    }
}
