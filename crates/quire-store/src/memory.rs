//! `MemoryStateStore`: process-local persistence for tests and embedding.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use quire_contracts::{
    error::QuireResult,
    run::{RunId, WorkflowState},
};
use quire_core::traits::StateStore;

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    runs: Mutex<HashMap<RunId, WorkflowState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored run id, sorted.
    pub fn run_ids(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn remove(&self, run_id: &RunId) -> bool {
        self.lock().remove(run_id).is_some()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RunId, WorkflowState>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn save(&self, state: &WorkflowState) -> QuireResult<()> {
        self.lock().insert(state.run_id.clone(), state.clone());
        Ok(())
    }

    fn load(&self, run_id: &RunId) -> QuireResult<Option<WorkflowState>> {
        Ok(self.lock().get(run_id).cloned())
    }
}
