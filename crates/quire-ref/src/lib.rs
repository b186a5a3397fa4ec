//! # quire-ref
//!
//! Reference runtime for the quire run coordinator.
//!
//! Provides deterministic stand-ins for everything a real deployment plugs
//! in, so a full pipeline runs offline:
//!
//! 1. **Stages**: `ReferencePlanner`, `ReferenceResearcher`,
//!    `ReferenceWriter` and `ReferenceCritic`.
//! 2. **Retrieval**: `DocumentRetriever`, a keyword-overlap search over the
//!    embedded sample corpus.
//! 3. **Wiring**: `RuntimeBuilder`, which assembles a `Coordinator` with the
//!    file-backed tracer, store and schema verifier.
//!
//! All corpus content is fictional. No external calls are made.

pub mod corpus;
pub mod retriever;
pub mod runtime;
pub mod stages;

pub use corpus::{sample_documents, CorpusDocument};
pub use retriever::DocumentRetriever;
pub use runtime::{Runtime, RuntimeBuilder};
pub use stages::{ReferenceCritic, ReferencePlanner, ReferenceResearcher, ReferenceWriter};

// ── Tests ─────────────────────────────────────────────────────────────────────
