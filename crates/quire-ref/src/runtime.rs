//! Wiring: builds a `Coordinator` from a `QuireConfig` with the reference
//! stages and the workspace's own collaborators.
//!
//! ```rust,ignore
//! let runtime = RuntimeBuilder::new(config).build()?;
//! let state = runtime.coordinator.start("Proposal for ACME", "retailer", None);
//! ```

use std::sync::Arc;

use tracing::debug;

use quire_audit::Tracer;
use quire_contracts::{config::QuireConfig, error::QuireResult};
use quire_core::{
    traits::{Retriever, StageExecutor},
    ApprovalGate, Collaborators, Coordinator, StageSet,
};
use quire_store::FileStateStore;
use quire_verify::SchemaVerifier;

use crate::{
    retriever::DocumentRetriever,
    stages::{ReferenceCritic, ReferencePlanner, ReferenceResearcher, ReferenceWriter},
};

/// A wired coordinator plus the concrete collaborators callers inspect
/// directly (trace replay, run listing).
pub struct Runtime {
    pub coordinator: Coordinator,
    pub tracer: Arc<Tracer>,
    pub store: Arc<FileStateStore>,
}

pub struct RuntimeBuilder {
    config: QuireConfig,
    retriever: Option<Arc<dyn Retriever>>,
    critic: Option<Arc<dyn StageExecutor>>,
}

impl RuntimeBuilder {
    pub fn new(config: QuireConfig) -> Self {
        Self {
            config,
            retriever: None,
            critic: None,
        }
    }

    /// Replace the sample-corpus retriever.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Replace the default `ReferenceCritic`.
    pub fn with_critic(mut self, critic: Arc<dyn StageExecutor>) -> Self {
        self.critic = Some(critic);
        self
    }

    /// Build the runtime. Fails when the trace settings are invalid.
    ///
    /// Trace logs and run state share `trace.runs_dir`.
    pub fn build(self) -> QuireResult<Runtime> {
        let tracer = Arc::new(Tracer::new(self.config.trace.clone())?);
        let store = Arc::new(FileStateStore::new(self.config.trace.runs_dir.clone()));
        let gate = Arc::new(ApprovalGate::new(self.config.approval.auto_approve));

        let stages = StageSet {
            planner: Arc::new(ReferencePlanner),
            researcher: Arc::new(ReferenceResearcher),
            writer: Arc::new(ReferenceWriter),
            critic: self
                .critic
                .unwrap_or_else(|| Arc::new(ReferenceCritic::new())),
        };
        let collaborators = Collaborators {
            retriever: self
                .retriever
                .unwrap_or_else(|| Arc::new(DocumentRetriever::sample())),
            verifier: Arc::new(SchemaVerifier::new()),
            tracer: tracer.clone(),
            store: store.clone(),
            gate,
        };

        debug!(
            runs_dir = %self.config.trace.runs_dir.display(),
            auto_approve = self.config.approval.auto_approve,
            "reference runtime built"
        );

        Ok(Runtime {
            coordinator: Coordinator::new(stages, collaborators, self.config),
            tracer,
            store,
        })
    }
}
