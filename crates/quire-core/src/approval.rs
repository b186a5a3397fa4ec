//! The human approval checkpoint.
//!
//! One `ApprovalGate` is shared by every run in the process. All access to
//! the registry goes through a single mutex; operations are O(1) map lookups
//! so the coarse lock is never held for long.
//!
//! The registry is not persisted. Losing it loses only in-flight pending
//! decisions; `WorkflowState::status` stays the durable record of whether a
//! run was approved.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use quire_contracts::{
    approval::{ApprovalRequest, ApprovalStatus},
    run::RunId,
};

/// Resolver name recorded on requests approved by auto-approve mode.
pub const AUTO_RESOLVER: &str = "auto";

#[derive(Debug, Default)]
pub struct ApprovalGate {
    auto_approve: bool,
    requests: Mutex<HashMap<RunId, ApprovalRequest>>,
}

impl ApprovalGate {
    pub fn new(auto_approve: bool) -> Self {
        Self {
            auto_approve,
            requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn auto_approve(&self) -> bool {
        self.auto_approve
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<RunId, ApprovalRequest>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open an approval request for `run_id`.
    ///
    /// In auto-approve mode the returned record is already Approved and
    /// nothing is registered. Otherwise a Pending record is registered,
    /// replacing any earlier record for the same run.
    pub fn request_approval(&self, run_id: &RunId, content: &str, context: Value) -> ApprovalRequest {
        let mut request = ApprovalRequest::pending(run_id.clone(), content, context);

        if self.auto_approve {
            request.resolve(ApprovalStatus::Approved, AUTO_RESOLVER, None);
            info!(run_id = %run_id, "approval granted automatically");
            return request;
        }

        let mut registry = self.registry();
        if let Some(prev) = registry.insert(run_id.clone(), request.clone()) {
            warn!(
                run_id = %run_id,
                previous_status = ?prev.status,
                "replacing existing approval record"
            );
        }
        info!(run_id = %run_id, "approval requested");
        request
    }

    /// Approve the pending request for `run_id`.
    ///
    /// Returns false when there is no pending request for that run.
    pub fn approve(&self, run_id: &RunId, resolver: &str, comments: Option<&str>) -> bool {
        self.resolve(run_id, ApprovalStatus::Approved, resolver, comments)
    }

    /// Reject the pending request for `run_id`.
    ///
    /// Returns false when there is no pending request for that run.
    pub fn reject(&self, run_id: &RunId, resolver: &str, comments: Option<&str>) -> bool {
        self.resolve(run_id, ApprovalStatus::Rejected, resolver, comments)
    }

    fn resolve(
        &self,
        run_id: &RunId,
        status: ApprovalStatus,
        resolver: &str,
        comments: Option<&str>,
    ) -> bool {
        let mut registry = self.registry();
        match registry.get_mut(run_id) {
            Some(request) if request.status == ApprovalStatus::Pending => {
                request.resolve(status, resolver, comments);
                info!(run_id = %run_id, status = ?status, resolver, "approval resolved");
                true
            }
            Some(request) => {
                warn!(
                    run_id = %run_id,
                    current = ?request.status,
                    "approval already resolved"
                );
                false
            }
            None => {
                warn!(run_id = %run_id, "no approval request for run");
                false
            }
        }
    }

    pub fn get_status(&self, run_id: &RunId) -> Option<ApprovalStatus> {
        self.registry().get(run_id).map(|r| r.status)
    }

    pub fn get_request(&self, run_id: &RunId) -> Option<ApprovalRequest> {
        self.registry().get(run_id).cloned()
    }

    pub fn is_pending(&self, run_id: &RunId) -> bool {
        self.get_status(run_id) == Some(ApprovalStatus::Pending)
    }

    pub fn is_approved(&self, run_id: &RunId) -> bool {
        self.get_status(run_id) == Some(ApprovalStatus::Approved)
    }

    /// Snapshot of every Pending request, oldest first.
    pub fn list_pending(&self) -> Vec<ApprovalRequest> {
        let mut pending: Vec<ApprovalRequest> = self
            .registry()
            .values()
            .filter(|r| r.status == ApprovalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    /// Drop the record for one run, or every record when `run_id` is `None`.
    pub fn clear(&self, run_id: Option<&RunId>) {
        let mut registry = self.registry();
        match run_id {
            Some(id) => {
                registry.remove(id);
            }
            None => registry.clear(),
        }
        debug!(remaining = registry.len(), "approval records cleared");
    }

    /// Move Pending requests older than `max_age` to Timeout.
    ///
    /// Returns how many requests expired.
    pub fn expire_stale(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut expired = 0;
        for request in self.registry().values_mut() {
            if request.status == ApprovalStatus::Pending && request.created_at < cutoff {
                request.resolve(ApprovalStatus::Timeout, "system", Some("approval timed out"));
                warn!(run_id = %request.run_id, "approval request timed out");
                expired += 1;
            }
        }
        expired
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
