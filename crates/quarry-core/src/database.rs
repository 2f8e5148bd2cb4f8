//! # Database Model
//!
//! A database is a directory holding an imported dataset plus optional
//! sidecar files: the schema the dataset conforms to and a source
//! description used for rendering results as structured findings.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::CoreError;

/// A target database selected for evaluation.
#[derive(Debug, Clone)]
pub struct Database {
    /// Display name (usually the directory name).
    pub name: String,
    /// Root directory of the database.
    pub path: PathBuf,
    /// Directory holding the queryable dataset, if the import succeeded.
    pub dataset_dir: Option<PathBuf>,
    /// Schema file the dataset currently conforms to, if known.
    pub schema_path: Option<PathBuf>,
    /// Source description file; its presence enables interpreted results.
    pub source_metadata: Option<PathBuf>,
}

impl Database {
    /// The resolved dataset directory, or `InvalidDatabase` if the
    /// database was never imported.
    pub fn dataset_dir(&self) -> Result<&Path, CoreError> {
        self.dataset_dir.as_deref().ok_or_else(|| {
            CoreError::InvalidDatabase(format!(
                "database '{}' has no resolved dataset; import it before running queries",
                self.name
            ))
        })
    }

    /// Whether query results can be rendered as structured findings.
    ///
    /// Absence is not an error — the query still runs, its results are
    /// just presented as raw tuples.
    pub fn has_interpreted_results(&self) -> bool {
        match &self.source_metadata {
            Some(p) if p.exists() => true,
            Some(p) => {
                tracing::info!(
                    "source metadata {} is missing; results will be raw tuples only",
                    p.display()
                );
                false
            }
            None => {
                tracing::info!(
                    "database '{}' has no source metadata; results will be raw tuples only",
                    self.name
                );
                false
            }
        }
    }

    /// Presentation summary for terminal results.
    pub fn summary(&self) -> DatabaseSummary {
        DatabaseSummary {
            name: self.name.clone(),
            uri: self.path.display().to_string(),
        }
    }
}

/// The slice of database identity that outlives the evaluation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DatabaseSummary {
    pub name: String,
    pub uri: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(dataset: Option<PathBuf>) -> Database {
        Database {
            name: "sample".into(),
            path: PathBuf::from("/tmp/sample"),
            dataset_dir: dataset,
            schema_path: None,
            source_metadata: None,
        }
    }

    #[test]
    fn test_dataset_dir_present() {
        let d = db(Some(PathBuf::from("/tmp/sample/dataset")));
        assert_eq!(
            d.dataset_dir().unwrap(),
            Path::new("/tmp/sample/dataset")
        );
    }

    #[test]
    fn test_missing_dataset_is_invalid_database() {
        let d = db(None);
        let err = d.dataset_dir().unwrap_err();
        assert!(matches!(err, CoreError::InvalidDatabase(_)));
        assert!(err.to_string().contains("sample"));
    }

    #[test]
    fn test_interpreted_results_require_existing_metadata_file() {
        let tmp = tempfile::tempdir().unwrap();
        let meta = tmp.path().join("database.yml");

        let mut d = db(Some(tmp.path().to_path_buf()));
        assert!(!d.has_interpreted_results());

        d.source_metadata = Some(meta.clone());
        assert!(!d.has_interpreted_results());

        std::fs::write(&meta, "name: sample\n").unwrap();
        assert!(d.has_interpreted_results());
    }
}
