//! `FileStateStore`: one directory per run under `runs_dir`.
//!
//! Layout of `<runs_dir>/<run_id>/`:
//!
//! ```text
//! state.json       the full WorkflowState (the only file loaded back)
//! plan.json        retrieved.json
//! draft.md         draft_v<N>.md
//! critique.md      critique.json
//! final.md         once the run is Completed and approved
//! trace.jsonl      written by the tracer, not by this store
//! ```

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use quire_contracts::{
    error::{QuireError, QuireResult},
    run::{RunId, WorkflowState, WorkflowStatus},
};
use quire_core::traits::StateStore;

use crate::artifacts;

pub const STATE_FILE: &str = "state.json";
pub const FINAL_FILE: &str = "final.md";

/// One row of `list_runs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    /// `None` when the directory has no readable `state.json`.
    pub created_at: Option<DateTime<Utc>>,
    pub status: Option<WorkflowStatus>,
    pub approved: bool,
    pub has_final: bool,
}

#[derive(Debug, Clone)]
pub struct FileStateStore {
    runs_dir: PathBuf,
}

impl FileStateStore {
    pub fn new(runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            runs_dir: runs_dir.into(),
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// `<runs_dir>/<run_id>`, or `StoreFailed` when the id cannot name a
    /// directory.
    pub fn run_dir(&self, run_id: &RunId) -> QuireResult<PathBuf> {
        if !run_id.is_path_safe() {
            return Err(QuireError::StoreFailed {
                reason: format!("run id '{}' cannot name a run directory", run_id),
            });
        }
        Ok(self.runs_dir.join(run_id.as_str()))
    }

    /// Every run directory with a summary, newest first.
    ///
    /// Directories without a readable state sort last.
    pub fn list_runs(&self) -> QuireResult<Vec<RunSummary>> {
        let entries = match fs::read_dir(&self.runs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err("list", &self.runs_dir, e)),
        };

        let mut runs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err("list", &self.runs_dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            let run_id = RunId::from(name);
            let state = match self.load(&run_id) {
                Ok(state) => state,
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "skipping unreadable run state");
                    None
                }
            };
            runs.push(RunSummary {
                has_final: entry.path().join(FINAL_FILE).exists(),
                created_at: state.as_ref().map(|s| s.created_at),
                status: state.as_ref().map(|s| s.status),
                approved: state.as_ref().is_some_and(|s| s.approved),
                run_id,
            });
        }

        runs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(runs)
    }

    /// Remove a run directory and everything in it, including its trace log.
    ///
    /// Returns `false` when there was nothing to delete.
    pub fn delete_run(&self, run_id: &RunId) -> QuireResult<bool> {
        let dir = self.run_dir(run_id)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(run_id = %run_id, "run deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err("delete", &dir, e)),
        }
    }

    fn write_atomic(path: &Path, contents: &[u8]) -> QuireResult<()> {
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents).map_err(|e| io_err("write", &tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| io_err("rename", path, e))
    }
}

impl StateStore for FileStateStore {
    fn save(&self, state: &WorkflowState) -> QuireResult<()> {
        let dir = self.run_dir(&state.run_id)?;
        fs::create_dir_all(&dir).map_err(|e| io_err("create", &dir, e))?;

        let rendered = artifacts::render(state).map_err(|e| QuireError::StoreFailed {
            reason: format!("could not render artifacts: {}", e),
        })?;
        for artifact in &rendered {
            let path = dir.join(&artifact.name);
            fs::write(&path, &artifact.contents).map_err(|e| io_err("write", &path, e))?;
        }

        let json = serde_json::to_vec_pretty(state).map_err(|e| QuireError::StoreFailed {
            reason: format!("could not encode state: {}", e),
        })?;
        Self::write_atomic(&dir.join(STATE_FILE), &json)?;

        debug!(
            run_id = %state.run_id,
            status = %state.status,
            step = state.current_step,
            artifacts = rendered.len(),
            "run state saved"
        );
        Ok(())
    }

    fn load(&self, run_id: &RunId) -> QuireResult<Option<WorkflowState>> {
        let path = self.run_dir(run_id)?.join(STATE_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err("read", &path, e)),
        };
        let state = serde_json::from_slice(&bytes).map_err(|e| QuireError::StoreFailed {
            reason: format!("'{}' is not a valid run state: {}", path.display(), e),
        })?;
        Ok(Some(state))
    }

    fn location(&self, run_id: &RunId) -> Option<PathBuf> {
        self.run_dir(run_id).ok()
    }
}

fn io_err(op: &str, path: &Path, e: std::io::Error) -> QuireError {
    QuireError::StoreFailed {
        reason: format!("failed to {} '{}': {}", op, path.display(), e),
    }
}
