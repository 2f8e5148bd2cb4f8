//! # Evaluation Session
//!
//! The unit of identity for one compile+run attempt. A session is built
//! once, owns its immutable inputs, and names the artifact files the
//! evaluation server will write for it. It is never mutated after
//! construction and never shared across concurrent attempts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::database::Database;
use crate::error::CoreError;
use crate::workspace::ArtifactWorkspace;

/// The query program handed to the compiler: where to look for libraries,
/// which schema the database uses, and the query source itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryProgram {
    /// Ordered library search directories.
    pub library_path: Vec<PathBuf>,
    /// Schema file the *database* conforms to.
    pub schema_path: PathBuf,
    /// Query source file.
    pub query_path: PathBuf,
}

/// Editor selection for quick evaluation: compile and run only the
/// sub-expression under the cursor. 1-based, end-inclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuickEvalCursor {
    pub file: PathBuf,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

/// Descriptive annotations read from the query source. Best-effort;
/// absence of any field (or the whole block) is normal.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: Option<String>,
    pub id: Option<String>,
}

/// One compile+run attempt. Immutable after construction.
#[derive(Debug)]
pub struct EvaluationSession {
    id: u64,
    program: QueryProgram,
    database: Database,
    expected_schema_path: PathBuf,
    quick_eval: Option<QuickEvalCursor>,
    metadata: Option<QueryMetadata>,
    template_values: HashMap<String, String>,
    plan_path: PathBuf,
    tuples_path: PathBuf,
    findings_path: PathBuf,
}

impl EvaluationSession {
    /// Build a session, allocating a fresh id (and therefore fresh
    /// artifact paths) from the workspace.
    ///
    /// Fails with [`CoreError::InvalidDatabase`] if the database has no
    /// resolved dataset.
    pub fn new(
        workspace: &ArtifactWorkspace,
        program: QueryProgram,
        database: Database,
        expected_schema_path: PathBuf,
        quick_eval: Option<QuickEvalCursor>,
        metadata: Option<QueryMetadata>,
        template_values: HashMap<String, String>,
    ) -> Result<Self, CoreError> {
        database.dataset_dir()?;
        let id = workspace.next_session_id();
        Ok(Self {
            id,
            program,
            database,
            expected_schema_path,
            quick_eval,
            metadata,
            template_values,
            plan_path: workspace.plan_path(id),
            tuples_path: workspace.tuples_path(id),
            findings_path: workspace.findings_path(id),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn program(&self) -> &QueryProgram {
        &self.program
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Schema file the query's resolved library expects. May differ from
    /// `program().schema_path` until the database is upgraded.
    pub fn expected_schema_path(&self) -> &Path {
        &self.expected_schema_path
    }

    pub fn quick_eval(&self) -> Option<&QuickEvalCursor> {
        self.quick_eval.as_ref()
    }

    pub fn metadata(&self) -> Option<&QueryMetadata> {
        self.metadata.as_ref()
    }

    pub fn template_values(&self) -> &HashMap<String, String> {
        &self.template_values
    }

    /// Where the server writes the compiled query plan.
    pub fn plan_path(&self) -> &Path {
        &self.plan_path
    }

    /// Where the server writes raw tuple results.
    pub fn tuples_path(&self) -> &Path {
        &self.tuples_path
    }

    /// Where interpreted findings are written, when the database supports
    /// them.
    pub fn findings_path(&self) -> &Path {
        &self.findings_path
    }
}
