//! Configuration schema.
//!
//! `QuireConfig` is deserialized from a TOML document by `quire-policy`.
//! Every field has a default, so an empty document is a valid config.
//!
//! ```toml
//! [guardrails]
//! tool_allowlist = ["plan", "retrieve", "research", "write_draft"]
//! allowed_write_paths = ["runs"]
//! max_steps = 20
//! max_parallel = 3
//!
//! [approval]
//! auto_approve = false
//!
//! [trace]
//! runs_dir = "runs"
//! mask_pii = true
//!
//! [workflow]
//! max_replans = 2
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Tool names every phase of the pipeline uses.
pub const DEFAULT_TOOLS: &[&str] = &[
    "plan",
    "retrieve",
    "research",
    "write_draft",
    "critique",
    "revise_draft",
    "request_approval",
    "finalize",
];

/// Email, `ddd-dddd-dddd` phone numbers and 16-digit card numbers.
pub const DEFAULT_PII_PATTERNS: &[&str] = &[
    r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
    r"\b\d{3}-\d{4}-\d{4}\b",
    r"\b\d{4}-\d{4}-\d{4}-\d{4}\b",
];

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuireConfig {
    pub guardrails: GuardrailPolicy,
    pub approval: ApprovalSettings,
    pub trace: TraceSettings,
    pub workflow: WorkflowSettings,
}

/// Per-run safety policy.
///
/// The live counters are not part of the policy; `Guardrails` owns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailPolicy {
    pub tool_allowlist: BTreeSet<String>,
    /// Roots under which writes are allowed. Relative roots resolve against
    /// the process working directory.
    pub allowed_write_paths: Vec<PathBuf>,
    pub max_steps: u32,
    pub max_parallel: u32,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            tool_allowlist: DEFAULT_TOOLS.iter().map(|s| s.to_string()).collect(),
            allowed_write_paths: vec![PathBuf::from("runs")],
            max_steps: 20,
            max_parallel: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSettings {
    /// Approve every draft immediately with resolver "auto".
    pub auto_approve: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSettings {
    /// When false, entries are built and returned but never buffered or persisted.
    pub enabled: bool,
    /// Each run logs to `<runs_dir>/<run_id>/trace.jsonl`.
    pub runs_dir: PathBuf,
    pub mask_pii: bool,
    pub pii_patterns: Vec<String>,
    pub mask_token: String,
    /// String leaves longer than this are truncated. 0 disables truncation.
    pub max_field_len: usize,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            runs_dir: PathBuf::from("runs"),
            mask_pii: true,
            pii_patterns: DEFAULT_PII_PATTERNS.iter().map(|s| s.to_string()).collect(),
            mask_token: "[MASKED]".to_string(),
            max_field_len: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// How many times an empty research pass may send the run back to planning.
    pub max_replans: u32,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self { max_replans: 2 }
    }
}
