//! # Error Taxonomy
//!
//! Errors raised before any request reaches the evaluation server.
//! Failures that represent a decision already reached (compilation errors,
//! cancellation) are not errors at this layer — they become terminal
//! [`EvaluationOutcome`](crate::EvaluationOutcome)s instead.

use std::path::PathBuf;

use thiserror::Error;

/// Fatal pre-flight errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The selected database has no resolved dataset or schema.
    #[error("invalid database: {0}")]
    InvalidDatabase(String),

    /// The query's expected schema cannot be reconciled with the
    /// database's schema, and no upgrade path closes the gap.
    #[error("incompatible schema: {0}")]
    IncompatibleSchema(String),

    /// No directory entry matches a path component under case-insensitive
    /// lookup while canonicalizing.
    #[error("could not resolve the on-disk casing of {}", .0.display())]
    PathResolution(PathBuf),

    /// Filesystem failure, tagged with the path that caused it.
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    /// Wrap an [`std::io::Error`] with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
