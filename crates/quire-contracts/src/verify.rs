//! Stage payload verification schema and report types.
//!
//! Before a stage payload is deserialized and merged into `WorkflowState`,
//! the verifier runs it against a `PayloadSchema`. Only a passing
//! `VerificationReport` lets the phase complete.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a stage payload must look like.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadSchema {
    /// Unique identifier for this schema (e.g. "critique-v1").
    pub schema_id: String,
    /// JSON Schema document for structural validation. `Null` skips it.
    pub json_schema: Value,
    /// Additional rules evaluated after structural validation.
    pub rules: Vec<VerificationRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRule {
    pub rule_id: String,
    pub description: String,
    pub rule_type: VerificationRuleType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VerificationRuleType {
    /// The field at `field_path` must be present and non-null.
    RequiredField {
        /// Dotted path, e.g. "findings.0.topic".
        field_path: String,
    },

    /// The string at `field_path` must not contain `pattern`.
    ForbiddenPattern { field_path: String, pattern: String },
}

/// The result of running a `PayloadSchema` against a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True only if all checks passed.
    pub passed: bool,
    pub failures: Vec<VerificationFailure>,
}

impl VerificationReport {
    /// `"[rule] message; [rule] message"` for error strings and logs.
    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("[{}] {}", f.rule_id, f.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationFailure {
    pub rule_id: String,
    pub message: String,
}
