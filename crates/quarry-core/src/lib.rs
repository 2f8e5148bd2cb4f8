//! # quarry-core — The Ledger
//!
//! Domain model and leaf algorithms for the QUARRY evaluation pipeline:
//! evaluation sessions and their artifact bookkeeping, the target-database
//! model, terminal outcomes, content-addressed schema identity, and
//! exact-casing path resolution.
//!
//! Everything here is synchronous and self-contained; the protocol client
//! and orchestration live in `quarry-client`.

pub mod database;
pub mod error;
pub mod hash;
pub mod outcome;
pub mod paths;
pub mod session;
pub mod workspace;

pub use database::{Database, DatabaseSummary};
pub use error::CoreError;
pub use hash::SchemaHash;
pub use outcome::{
    Diagnostic, EvaluationOutcome, HistoryOptions, Position, QueryWithResults, ResultKind,
    Severity,
};
pub use paths::{canonical_path, fold_name};
pub use session::{EvaluationSession, QueryMetadata, QueryProgram, QuickEvalCursor};
pub use workspace::ArtifactWorkspace;
