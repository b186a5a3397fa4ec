//! # quire-verify
//!
//! Stage payload verification for quire runs.
//!
//! This crate provides [`schema::SchemaVerifier`], which implements the
//! [`quire_core::traits::Verifier`] trait. It checks stage payloads in two
//! passes before the coordinator merges them into run state:
//!
//! 1. **Structural**: JSON Schema validation via the `jsonschema` crate.
//! 2. **Field rules**: `RequiredField` and `ForbiddenPattern`, addressed by
//!    dotted paths.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use quire_verify::SchemaVerifier;
//!
//! let collaborators = Collaborators {
//!     verifier: Arc::new(SchemaVerifier::new()),
//!     ..
//! };
//! ```

pub mod schema;

pub use schema::{SchemaVerifier, JSON_SCHEMA_RULE};
