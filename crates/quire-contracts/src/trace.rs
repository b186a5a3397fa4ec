//! Trace entry types.
//!
//! `TraceRecord` is what the coordinator hands to the tracer; `TraceEntry`
//! is the immutable, sanitized result that is buffered, persisted, and
//! mirrored into `WorkflowState::trace`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::run::RunId;

/// An immutable audit record of one phase action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    /// Step number assigned by the coordinator, not by arrival order.
    pub step: u32,
    pub agent: String,
    pub action: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// The unsanitized arguments to `trace()`.
#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub run_id: RunId,
    pub step: u32,
    pub agent: String,
    pub action: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: Option<u64>,
}

impl TraceRecord {
    /// Build the entry without any sanitization, stamped now.
    pub fn into_entry(self) -> TraceEntry {
        TraceEntry {
            run_id: self.run_id,
            timestamp: Utc::now(),
            step: self.step,
            agent: self.agent,
            action: self.action,
            input: self.input,
            output: self.output,
            success: self.success,
            error: self.error,
            duration_ms: self.duration_ms,
        }
    }
}
