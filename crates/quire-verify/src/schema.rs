//! Schema-based payload verifier for quire stages.
//!
//! `SchemaVerifier` implements the `Verifier` trait from `quire-core`.
//! Verification runs in two passes:
//!
//! 1. **Structural**: the stage payload is validated against
//!    `PayloadSchema::json_schema` using the `jsonschema` crate.
//! 2. **Field rules**: each `VerificationRule` in `PayloadSchema::rules` is
//!    evaluated in order. All failures are collected before returning so the
//!    trace carries the full failure set in one pass.

use serde_json::Value;
use tracing::{debug, warn};

use quire_contracts::{
    error::{QuireError, QuireResult},
    verify::{PayloadSchema, VerificationFailure, VerificationReport, VerificationRuleType},
};
use quire_core::traits::Verifier;

/// Rule id attached to every structural failure.
pub const JSON_SCHEMA_RULE: &str = "json-schema";

/// The stateless quire payload verifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaVerifier;

impl SchemaVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a dotted path (e.g. `"findings.0.topic"`) against a payload.
    ///
    /// Numeric segments index into arrays. Returns `None` when any segment is
    /// missing or the value is JSON `null`.
    pub fn resolve_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
        let mut current = value;
        for segment in path.split('.') {
            let next = match current {
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                other => other.get(segment),
            };
            match next {
                Some(v) if !v.is_null() => current = v,
                _ => return None,
            }
        }
        Some(current)
    }

    fn check_rule(rule_type: &VerificationRuleType, payload: &Value) -> Option<String> {
        match rule_type {
            VerificationRuleType::RequiredField { field_path } => {
                match Self::resolve_path(payload, field_path) {
                    None => Some(format!("required field '{field_path}' is missing or null")),
                    Some(_) => None,
                }
            }

            // Absent or non-string fields pass; the rule only inspects text.
            VerificationRuleType::ForbiddenPattern { field_path, pattern } => {
                match Self::resolve_path(payload, field_path).and_then(Value::as_str) {
                    Some(s) if s.contains(pattern.as_str()) => Some(format!(
                        "field '{field_path}' contains forbidden pattern '{pattern}'"
                    )),
                    _ => None,
                }
            }
        }
    }
}

impl Verifier for SchemaVerifier {
    fn verify(&self, payload: &Value, schema: &PayloadSchema) -> QuireResult<VerificationReport> {
        let mut failures: Vec<VerificationFailure> = Vec::new();

        // ── Pass 1: JSON Schema ───────────────────────────────────────────────
        if !schema.json_schema.is_null() {
            let validator = jsonschema::validator_for(&schema.json_schema).map_err(|e| {
                QuireError::SchemaValidation {
                    reason: format!("schema '{}' does not compile: {}", schema.schema_id, e),
                }
            })?;
            for error in validator.iter_errors(payload) {
                let message = format!("JSON Schema violation at {}: {}", error.instance_path, error);
                warn!(schema_id = %schema.schema_id, %message, "structural validation failure");
                failures.push(VerificationFailure {
                    rule_id: JSON_SCHEMA_RULE.to_string(),
                    message,
                });
            }
        }

        // ── Pass 2: field rules ───────────────────────────────────────────────
        for rule in &schema.rules {
            debug!(rule_id = %rule.rule_id, description = %rule.description, "evaluating rule");
            if let Some(message) = Self::check_rule(&rule.rule_type, payload) {
                warn!(rule_id = %rule.rule_id, %message, "field rule failed");
                failures.push(VerificationFailure {
                    rule_id: rule.rule_id.clone(),
                    message,
                });
            }
        }

        let passed = failures.is_empty();
        debug!(
            schema_id = %schema.schema_id,
            passed,
            failure_count = failures.len(),
            "verification complete"
        );

        Ok(VerificationReport { passed, failures })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
