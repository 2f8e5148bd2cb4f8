//! # Evaluation Outcomes
//!
//! Every compile-and-run attempt ends in exactly one terminal
//! [`EvaluationOutcome`] — success, compilation failure, cancellation, or
//! some other error — never in silence. Diagnostics, outcomes, and the
//! final [`QueryWithResults`] bundle live here.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::database::DatabaseSummary;
use crate::session::EvaluationSession;

/// Diagnostic severity. Only errors block execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Source span of a diagnostic. Lines and columns are 1-based,
/// end-inclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    pub file: PathBuf,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

/// A single compiler diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub position: Position,
}

impl fmt::Display for Diagnostic {
    /// `ERROR: <message> (<file>:<startLine>:<startCol>:<endLine>:<endCol>)`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        };
        let p = &self.position;
        write!(
            f,
            "{}: {} ({}:{}:{}:{}:{})",
            tag,
            self.message,
            p.file.display(),
            p.start_line,
            p.start_column,
            p.end_line,
            p.end_column
        )
    }
}

/// Kind of terminal outcome.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Success,
    CompileError,
    Cancelled,
    OtherError,
}

/// The terminal outcome of one evaluation attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationOutcome {
    pub result_kind: ResultKind,
    /// Server-side evaluation time in milliseconds. Zero for outcomes
    /// synthesized client-side.
    pub elapsed_ms: f64,
    pub message: Option<String>,
    /// Server-assigned run id; `-1` when no run ever happened.
    pub run_id: i64,
    /// Correlation id of the run request, `0` when none was issued.
    pub correlation_id: u64,
}

impl EvaluationOutcome {
    /// Outcome for a user-cancelled evaluation.
    pub fn cancelled(correlation_id: u64) -> Self {
        Self {
            result_kind: ResultKind::Cancelled,
            elapsed_ms: 0.0,
            message: Some("Query cancelled".into()),
            run_id: -1,
            correlation_id,
        }
    }

    /// Outcome for a query that failed to compile.
    pub fn compile_failed(correlation_id: u64) -> Self {
        Self {
            result_kind: ResultKind::OtherError,
            elapsed_ms: 0.0,
            message: Some("Query had compilation errors".into()),
            run_id: -1,
            correlation_id,
        }
    }

    /// Outcome for a run request that resolved without ever delivering a
    /// result. The protocol promises a terminal outcome, so we make one.
    pub fn missing(correlation_id: u64) -> Self {
        Self {
            result_kind: ResultKind::OtherError,
            elapsed_ms: 0.0,
            message: Some("No result from server".into()),
            run_id: -1,
            correlation_id,
        }
    }
}

/// Free-form presentation metadata attached to a finished query, e.g. for
/// history views. Ephemeral queries capture their source text here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryOptions {
    pub label: Option<String>,
    pub query_text: Option<String>,
    /// ISO-8601 wall-clock time the evaluation started.
    pub started_at: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// Terminal artifact handed back to callers.
#[derive(Debug)]
pub struct QueryWithResults {
    pub session: EvaluationSession,
    pub outcome: EvaluationOutcome,
    pub database: DatabaseSummary,
    pub history: HistoryOptions,
}

impl QueryWithResults {
    pub fn succeeded(&self) -> bool {
        self.outcome.result_kind == ResultKind::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_display_format() {
        let d = Diagnostic {
            severity: Severity::Error,
            message: "unresolved predicate foo".into(),
            position: Position {
                file: PathBuf::from("queryA.ql"),
                start_line: 3,
                start_column: 1,
                end_line: 3,
                end_column: 10,
            },
        };
        assert_eq!(
            d.to_string(),
            "ERROR: unresolved predicate foo (queryA.ql:3:1:3:10)"
        );
    }

    #[test]
    fn test_synthesized_outcomes() {
        let c = EvaluationOutcome::cancelled(7);
        assert_eq!(c.result_kind, ResultKind::Cancelled);
        assert_eq!(c.message.as_deref(), Some("Query cancelled"));

        let f = EvaluationOutcome::compile_failed(0);
        assert_eq!(f.result_kind, ResultKind::OtherError);
        assert_eq!(f.message.as_deref(), Some("Query had compilation errors"));

        let m = EvaluationOutcome::missing(9);
        assert_eq!(m.result_kind, ResultKind::OtherError);
        assert_eq!(m.message.as_deref(), Some("No result from server"));
        assert_eq!(m.run_id, -1);
        assert_eq!(m.correlation_id, 9);
    }

    #[test]
    fn test_result_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&ResultKind::CompileError).unwrap(),
            "\"compile_error\""
        );
        assert_eq!(
            serde_json::from_str::<ResultKind>("\"other_error\"").unwrap(),
            ResultKind::OtherError
        );
    }
}
