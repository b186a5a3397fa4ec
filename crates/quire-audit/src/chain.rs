//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (bytes, in order):
//!   1. run_id as UTF-8 bytes
//!   2. sequence as 8-byte little-endian
//!   3. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   4. canonical JSON of the entry (serde_json, no pretty-printing)

use sha2::{Digest, Sha256};

use quire_contracts::{
    error::{QuireError, QuireResult},
    trace::TraceEntry,
};

use crate::event::TraceEvent;

/// Compute the SHA-256 hash for one trace event.
///
/// Returns a lowercase 64-character hex string.
pub fn hash_entry(
    run_id: &str,
    sequence: u64,
    entry: &TraceEntry,
    prev_hash: &str,
) -> QuireResult<String> {
    // Value maps are BTreeMaps, so key order is stable across calls.
    let entry_json = serde_json::to_vec(entry).map_err(|e| QuireError::TraceWriteFailed {
        reason: format!("could not serialize trace entry: {}", e),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&entry_json);

    Ok(hex::encode(hasher.finalize()))
}

/// Verify the integrity of one run's hash chain.
///
/// Returns `true` when, for every event in order:
///
/// 1. `sequence` equals its position in the slice.
/// 2. `prev_hash` equals the preceding event's `this_hash` (or
///    `GENESIS_HASH` for the first event).
/// 3. `this_hash` matches the value recomputed from the event's own fields.
///
/// An empty chain is valid.
pub fn verify_chain(events: &[TraceEvent]) -> bool {
    let mut expected_prev = TraceEvent::GENESIS_HASH.to_string();

    for (position, event) in events.iter().enumerate() {
        if event.sequence != position as u64 || event.prev_hash != expected_prev {
            return false;
        }

        let recomputed = match hash_entry(
            event.entry.run_id.as_str(),
            event.sequence,
            &event.entry,
            &event.prev_hash,
        ) {
            Ok(hash) => hash,
            Err(_) => return false,
        };
        if event.this_hash != recomputed {
            return false;
        }

        expected_prev = event.this_hash.clone();
    }

    true
}
