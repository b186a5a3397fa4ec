//! Per-run safety checks.
//!
//! One `Guardrails` value is built for each run and passed by reference into
//! every phase of that run. The counters are atomics so the checks take
//! `&self` and a run context can be shared with the stages it drives.
//!
//! Each check must be called exactly once per logical unit of work (one tool
//! call, one phase step), otherwise the counters drift.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, warn};

use quire_contracts::{config::GuardrailPolicy, error::GuardrailViolation};

#[derive(Debug)]
pub struct Guardrails {
    policy: GuardrailPolicy,
    step_count: AtomicU32,
    active_parallel: AtomicU32,
}

impl Guardrails {
    pub fn new(policy: GuardrailPolicy) -> Self {
        Self {
            policy,
            step_count: AtomicU32::new(0),
            active_parallel: AtomicU32::new(0),
        }
    }

    /// A guardrail set whose step counter resumes at `step`.
    ///
    /// Used when a persisted run is picked up again so the budget covers the
    /// whole run, not only the resumed part.
    pub fn resumed_at(policy: GuardrailPolicy, step: u32) -> Self {
        let g = Self::new(policy);
        g.restore_step(step);
        g
    }

    pub fn policy(&self) -> &GuardrailPolicy {
        &self.policy
    }

    // ── Tool allowlist ────────────────────────────────────────────────────────

    pub fn validate_tool(&self, tool: &str) -> Result<(), GuardrailViolation> {
        if self.policy.tool_allowlist.contains(tool) {
            debug!(tool, "tool allowed");
            return Ok(());
        }
        warn!(tool, "tool not in allowlist");
        Err(GuardrailViolation::ToolNotAllowed {
            tool: tool.to_string(),
            allowed: self.policy.tool_allowlist.iter().cloned().collect(),
        })
    }

    // ── Write paths ───────────────────────────────────────────────────────────

    /// Check that `path` resolves to a descendant of (or equals) one of the
    /// allowed roots.
    ///
    /// Both sides are made absolute, `.`/`..` are folded lexically, and the
    /// longest existing prefix is canonicalized so symlinks cannot be used to
    /// escape a root. The target itself does not need to exist yet.
    pub fn validate_write_path(&self, path: &Path) -> Result<(), GuardrailViolation> {
        let target = resolve(path);
        let allowed = self
            .policy
            .allowed_write_paths
            .iter()
            .map(|root| resolve(root))
            .any(|root| target.starts_with(&root));

        if allowed {
            debug!(path = %target.display(), "write path allowed");
            return Ok(());
        }
        warn!(path = %target.display(), "write path outside allowed roots");
        Err(GuardrailViolation::WritePathNotAllowed {
            path: target,
            allowed_roots: self.policy.allowed_write_paths.clone(),
        })
    }

    // ── Step budget ───────────────────────────────────────────────────────────

    /// Count one step and return its number (1-based).
    ///
    /// Fails once the count would exceed `max_steps`; the counter is left
    /// unchanged in that case.
    pub fn increment_step(&self) -> Result<u32, GuardrailViolation> {
        let max_steps = self.policy.max_steps;
        match self
            .step_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_steps).then_some(n + 1)
            }) {
            Ok(prev) => Ok(prev + 1),
            Err(current) => {
                warn!(max_steps, attempted = current + 1, "step budget exhausted");
                Err(GuardrailViolation::StepBudgetExceeded {
                    max_steps,
                    attempted: current.saturating_add(1),
                })
            }
        }
    }

    pub fn step_count(&self) -> u32 {
        self.step_count.load(Ordering::SeqCst)
    }

    pub fn reset_steps(&self) {
        self.step_count.store(0, Ordering::SeqCst);
    }

    pub fn restore_step(&self, step: u32) {
        self.step_count.store(step, Ordering::SeqCst);
    }

    // ── Parallel admission ────────────────────────────────────────────────────

    /// Take a parallel slot, failing immediately when all are in use.
    pub fn acquire_parallel_slot(&self) -> Result<(), GuardrailViolation> {
        let max_parallel = self.policy.max_parallel;
        self.active_parallel
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_parallel).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                warn!(max_parallel, "parallel budget exhausted");
                GuardrailViolation::ParallelBudgetExceeded { max_parallel }
            })
    }

    /// Give a slot back. Releasing with no slot held is a no-op.
    pub fn release_parallel_slot(&self) {
        let _ = self
            .active_parallel
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Acquire a slot that is released when the returned guard drops.
    pub fn parallel_slot(&self) -> Result<ParallelSlot<'_>, GuardrailViolation> {
        self.acquire_parallel_slot()?;
        Ok(ParallelSlot { guardrails: self })
    }

    pub fn active_parallel(&self) -> u32 {
        self.active_parallel.load(Ordering::SeqCst)
    }
}

/// RAII handle for one parallel slot.
#[derive(Debug)]
pub struct ParallelSlot<'a> {
    guardrails: &'a Guardrails,
}

impl Drop for ParallelSlot<'_> {
    fn drop(&mut self) {
        self.guardrails.release_parallel_slot();
    }
}

// ── Path resolution ───────────────────────────────────────────────────────────

fn resolve(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };
    canonicalize_existing_prefix(&normalize(&absolute))
}

/// Fold `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize the deepest ancestor that exists and re-append the rest.
fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut suffix = Vec::new();
    let mut current = path;
    loop {
        if let Ok(canonical) = current.canonicalize() {
            let mut out = canonical;
            for part in suffix.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (current.parent(), current.file_name()) {
            (Some(parent), Some(name)) => {
                suffix.push(name.to_os_string());
                current = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}
