//! # Wire Protocol
//!
//! Request and response bodies exchanged with the evaluation server.
//! Everything serializes as snake_case JSON. File paths placed into
//! requests must already be canonicalized (the server treats paths as
//! byte-exact keys) — the client handles that, not this module.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use quarry_core::{Diagnostic, QuickEvalCursor, ResultKind};

/// Logical working-set name inside a dataset. A batch of one query always
/// targets the default working set.
pub const DEFAULT_WORKING_SET: &str = "default";

/// Request method names.
pub mod methods {
    pub const COMPILE: &str = "compile";
    pub const RUN: &str = "run";
    pub const CLEAR_CACHE: &str = "clear_cache";
    pub const CANCEL: &str = "cancel";
}

/// The program under compilation: library search path, the schema the
/// database uses, and the query source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgramSpec {
    pub library_path: Vec<PathBuf>,
    pub schema_path: PathBuf,
    pub query_path: PathBuf,
}

/// Compiler switches. The defaults are the only configuration the
/// pipeline uses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompileOptions {
    pub no_location_urls: bool,
    pub warnings_as_errors: bool,
    pub fast_compilation: bool,
    pub include_intermediate: bool,
    pub local_checking: bool,
    pub compute_urls: bool,
    pub compute_to_string: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            no_location_urls: true,
            warnings_as_errors: false,
            fast_compilation: false,
            include_intermediate: true,
            local_checking: false,
            compute_urls: false,
            compute_to_string: false,
        }
    }
}

/// What to compile: the whole query, or just the sub-expression under an
/// editor cursor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CompilationTarget {
    Query,
    QuickEval { cursor: QuickEvalCursor },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    pub program: ProgramSpec,
    pub options: CompileOptions,
    pub target: CompilationTarget,
    /// Where the server writes the compiled plan.
    pub artifact_path: PathBuf,
    /// Server-enforced timeout. The client imposes no local deadline.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompileResponse {
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

/// The dataset a run targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub dataset_dir: PathBuf,
    pub working_set: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Compiled plan produced by a prior compile request.
    pub artifact_path: PathBuf,
    /// Where the server writes raw tuple results.
    pub results_path: PathBuf,
    pub dataset: RunSpec,
    /// Correlation id; doubles as the server-visible run id.
    pub run_id: u64,
    pub timeout_secs: u64,
    /// A batch of one query always runs to completion.
    pub stop_on_error: bool,
    #[serde(default)]
    pub template_values: HashMap<String, String>,
}

/// Out-of-band result of a run, delivered keyed by `run_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub run_id: i64,
    pub result_kind: ResultKind,
    pub elapsed_ms: f64,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearCacheRequest {
    pub dataset_dir: PathBuf,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearCacheResult {
    pub deletion_message: String,
}

/// Asynchronous notifications pushed by the server outside the
/// request/response pairing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "body")]
pub enum ServerEvent {
    RunResult(RunResult),
}
