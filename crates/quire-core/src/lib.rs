//! # quire-core
//!
//! The run coordinator for quire content pipelines.
//!
//! This crate provides:
//! - The collaborator traits (`StageExecutor`, `Retriever`, `Verifier`, `TraceSink`, `StateStore`)
//! - The shared `ApprovalGate`
//! - The pure `Router` that picks the next phase
//! - One `PhaseHandler` per stage-backed phase
//! - The `Coordinator` that drives a run through all of them
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quire_core::{Coordinator, StageSet, Collaborators};
//!
//! let coordinator = Coordinator::new(stages, collaborators, config);
//! let state = coordinator.start("Proposal for ACME", "mid-size retailer", None);
//! if state.status == WorkflowStatus::AwaitingApproval {
//!     let approved = coordinator.approve(&state.run_id, "alice", None)?;
//!     let done = coordinator.resume(approved);
//! }
//! ```

pub mod approval;
pub mod coordinator;
pub mod phases;
pub mod router;
pub mod traits;

pub use approval::ApprovalGate;
pub use coordinator::{Collaborators, Coordinator, RunContext, StageSet};
pub use router::{Route, Router};
