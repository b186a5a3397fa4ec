//! # quire-policy
//!
//! Safety policy for the quire run coordinator.
//!
//! ## Overview
//!
//! [`Guardrails`] enforces four per-run constraints: a tool allowlist,
//! write-path roots, a step budget, and a non-blocking parallel admission
//! budget. Every violation is a [`GuardrailViolation`] and is fatal to the
//! run; the coordinator never retries it.
//!
//! [`config`] loads the full `QuireConfig` document from TOML.
//!
//! ```rust,ignore
//! use quire_policy::{config, Guardrails};
//!
//! let cfg = config::from_file(Path::new("quire.toml"))?;
//! let guardrails = Guardrails::new(cfg.guardrails.clone());
//! guardrails.validate_tool("retrieve")?;
//! let step = guardrails.increment_step()?;
//! ```
//!
//! [`GuardrailViolation`]: quire_contracts::error::GuardrailViolation

pub mod config;
pub mod guardrails;

pub use guardrails::{Guardrails, ParallelSlot};

// ── Tests ─────────────────────────────────────────────────────────────────────
