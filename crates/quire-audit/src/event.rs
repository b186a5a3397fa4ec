//! On-disk trace event type.
//!
//! `TraceEvent` is one line of `trace.jsonl`. It wraps a sanitized
//! `TraceEntry` with its position in the run's chain and the SHA-256 hashes
//! that make tampering detectable. The entry fields are flattened so each
//! line stays readable with `tail -f` and `jq`.

use serde::{Deserialize, Serialize};

use quire_contracts::trace::TraceEntry;

/// A single entry in one run's hash chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Position in the chain, starting at 0. Independent of `entry.step`.
    pub sequence: u64,

    #[serde(flatten)]
    pub entry: TraceEntry,

    /// `this_hash` of the previous event, or `GENESIS_HASH` for the first.
    pub prev_hash: String,

    /// Computed by `hash_entry()` over (run_id, sequence, prev_hash,
    /// canonical JSON of entry).
    pub this_hash: String,
}

impl TraceEvent {
    /// The `prev_hash` of the first event in every chain: 64 hex zeros.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}
