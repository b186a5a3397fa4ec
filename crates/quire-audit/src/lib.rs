//! # quire-audit
//!
//! Append-only, SHA-256 hash-chained trace log for quire runs.
//!
//! ## Overview
//!
//! Every phase attempt the coordinator records is scrubbed of PII, truncated,
//! and wrapped in a `TraceEvent` that links to the previous event of the same
//! run via its SHA-256 hash. Events are appended to
//! `<runs_dir>/<run_id>/trace.jsonl` before `record()` returns. Tampering with
//! any line breaks the chain and is detected by `verify_chain`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quire_audit::Tracer;
//! use quire_core::traits::TraceSink;
//!
//! let tracer = Tracer::new(config.trace.clone())?;
//! tracer.record(record)?;
//! assert!(tracer.verify_integrity(&run_id)?);
//! let entries = tracer.replay(&run_id)?;
//! ```

pub mod chain;
pub mod event;
pub mod scrub;
pub mod tracer;

pub use chain::{hash_entry, verify_chain};
pub use event::TraceEvent;
pub use scrub::{PiiScrubber, TRUNCATION_SUFFIX};
pub use tracer::{Tracer, TRACE_FILE};

// ── Tests ─────────────────────────────────────────────────────────────────────
