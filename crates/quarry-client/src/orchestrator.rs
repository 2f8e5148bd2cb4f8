//! # Orchestrator
//!
//! The end-to-end "compile and run against a database" operation. Failures
//! that represent a decision already reached — compilation errors, user
//! cancellation — become terminal outcomes; only inability to even attempt
//! the evaluation (invalid database, unresolvable schema, transport loss)
//! surfaces as an error.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use quarry_core::{
    ArtifactWorkspace, CoreError, Database, EvaluationOutcome, EvaluationSession, HistoryOptions,
    QueryProgram, QueryWithResults, QuickEvalCursor, ResultKind,
};

use crate::client::QueryServerClient;
use crate::compat::reconcile_schemas;
use crate::error::ClientError;
use crate::progress::{Progress, ProgressSink};
use crate::resolver::{DatabaseUpgrader, MetadataResolver};

/// Compilation failures longer than this are summarized instead of shown
/// in full.
const MAX_INLINE_COMPILE_ERRORS: usize = 3;

/// Composes the resolver, the schema check, and the protocol client into
/// one evaluation pipeline.
pub struct QueryRunner {
    client: Arc<QueryServerClient>,
    resolver: Arc<dyn MetadataResolver>,
    upgrader: Arc<dyn DatabaseUpgrader>,
    workspace: Arc<ArtifactWorkspace>,
    search_path: Vec<PathBuf>,
}

impl QueryRunner {
    pub fn new(
        client: Arc<QueryServerClient>,
        resolver: Arc<dyn MetadataResolver>,
        upgrader: Arc<dyn DatabaseUpgrader>,
        workspace: Arc<ArtifactWorkspace>,
        search_path: Vec<PathBuf>,
    ) -> Self {
        Self {
            client,
            resolver,
            upgrader,
            workspace,
            search_path,
        }
    }

    /// Compile and run one query against one database. Always ends in
    /// exactly one terminal outcome.
    ///
    /// `query_path` and `quick_eval` come from the caller's selection
    /// step; extension conventions and unsaved-edit handling are the
    /// caller's concern.
    #[allow(clippy::too_many_arguments)]
    pub async fn compile_and_run(
        &self,
        database: &Database,
        query_path: &Path,
        quick_eval: Option<QuickEvalCursor>,
        template_values: HashMap<String, String>,
        timeout_secs: u64,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<QueryWithResults, ClientError> {
        let db_schema = database.schema_path.clone().ok_or_else(|| {
            CoreError::InvalidDatabase(format!(
                "database '{}' has no schema file",
                database.name
            ))
        })?;

        progress.report(Progress {
            step: 1,
            max_step: 4,
            message: format!("Resolving library for {}", query_path.display()),
        });
        let resolved = self
            .resolver
            .resolve_library_path(&self.search_path, query_path)
            .await?;

        // Cheap pre-check: schema file basenames differ when the query
        // targets a different language than the database holds. The
        // content-hash check below only runs when the names already match.
        let expected_name = resolved.schema_path.file_name();
        let actual_name = db_schema.file_name();
        if expected_name != actual_name {
            return Err(CoreError::IncompatibleSchema(format!(
                "query {} expects schema '{}' but database '{}' uses '{}'; \
                 select a database of the matching language",
                query_path.display(),
                resolved.schema_path.display(),
                database.name,
                db_schema.display(),
            ))
            .into());
        }

        // Best-effort; absence of metadata is not an error.
        let metadata = match self.resolver.resolve_metadata(query_path).await {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(
                    "could not resolve metadata for {}: {e}",
                    query_path.display()
                );
                None
            }
        };

        let program = QueryProgram {
            library_path: resolved.library_path,
            schema_path: db_schema,
            query_path: query_path.to_path_buf(),
        };
        let session = EvaluationSession::new(
            &self.workspace,
            program,
            database.clone(),
            resolved.schema_path,
            quick_eval,
            metadata,
            template_values,
        )?;
        let started_at = chrono::Utc::now().to_rfc3339();

        progress.report(Progress {
            step: 2,
            max_step: 4,
            message: "Checking schema compatibility".into(),
        });
        reconcile_schemas(
            database,
            session.expected_schema_path(),
            &self.search_path,
            self.resolver.as_ref(),
            self.upgrader.as_ref(),
            progress,
        )
        .await?;

        progress.report(Progress {
            step: 3,
            max_step: 4,
            message: "Compiling query".into(),
        });
        let errors = match self
            .client
            .compile(&session, timeout_secs, progress, cancel)
            .await
        {
            Ok(errors) => errors,
            Err(ClientError::Cancelled) => {
                // Cancelled during compile: terminal, and run is never issued.
                return Ok(finish(
                    session,
                    EvaluationOutcome::cancelled(0),
                    database,
                    started_at,
                ));
            }
            Err(e) => return Err(e),
        };

        if !errors.is_empty() {
            let formatted: Vec<String> = errors.iter().map(ToString::to_string).collect();
            for line in &formatted {
                tracing::error!("{line}");
            }
            if formatted.len() <= MAX_INLINE_COMPILE_ERRORS {
                tracing::error!("compilation failed:\n{}", formatted.join("\n"));
            } else {
                tracing::error!(
                    "compilation failed with {} errors; see the log above for details",
                    formatted.len()
                );
            }
            return Ok(finish(
                session,
                EvaluationOutcome::compile_failed(0),
                database,
                started_at,
            ));
        }

        progress.report(Progress {
            step: 4,
            max_step: 4,
            message: "Running query".into(),
        });
        let outcome = match self
            .client
            .run(&session, timeout_secs, progress, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(ClientError::Cancelled) => EvaluationOutcome::cancelled(0),
            Err(e) => return Err(e),
        };
        if outcome.result_kind != ResultKind::Success {
            // Surface the message, but still hand back the outcome.
            tracing::error!(
                "query evaluation did not succeed: {}",
                outcome.message.as_deref().unwrap_or("<no message>")
            );
        }
        Ok(finish(session, outcome, database, started_at))
    }
}

fn finish(
    session: EvaluationSession,
    outcome: EvaluationOutcome,
    database: &Database,
    started_at: String,
) -> QueryWithResults {
    let label = session
        .metadata()
        .and_then(|m| m.name.clone())
        .unwrap_or_else(|| {
            session
                .program()
                .query_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
    let summary = database.summary();
    QueryWithResults {
        session,
        outcome,
        database: summary,
        history: HistoryOptions {
            label: Some(label),
            query_text: None,
            started_at: Some(started_at),
            extra: HashMap::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::RunResultRegistry;
    use crate::progress::SilentProgress;
    use crate::protocol::{methods, CompileResponse, RunRequest, RunResult};
    use crate::resolver::{ResolvedLibrary, ResolvedUpgrades};
    use crate::transport::{EvaluationTransport, TransportError};
    use async_trait::async_trait;
    use quarry_core::{Diagnostic, Position, QueryMetadata, Severity};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // =========================================================================
    // Scripted collaborators
    // =========================================================================

    struct ScriptedTransport {
        registry: Arc<RunResultRegistry>,
        diagnostics: Vec<Diagnostic>,
        /// `Some(kind)` delivers a result during the run request;
        /// `None` lets the request resolve with no result at all.
        run_delivery: Option<ResultKind>,
        cancel_compile: bool,
        compile_calls: AtomicUsize,
        run_calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(registry: Arc<RunResultRegistry>) -> Self {
            Self {
                registry,
                diagnostics: Vec::new(),
                run_delivery: Some(ResultKind::Success),
                cancel_compile: false,
                compile_calls: AtomicUsize::new(0),
                run_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EvaluationTransport for ScriptedTransport {
        async fn request(
            &self,
            method: &str,
            params: Value,
            _cancel: &CancellationToken,
        ) -> Result<Value, TransportError> {
            match method {
                methods::COMPILE => {
                    self.compile_calls.fetch_add(1, Ordering::SeqCst);
                    if self.cancel_compile {
                        return Err(TransportError::Cancelled);
                    }
                    Ok(serde_json::to_value(CompileResponse {
                        diagnostics: self.diagnostics.clone(),
                    })
                    .unwrap())
                }
                methods::RUN => {
                    self.run_calls.fetch_add(1, Ordering::SeqCst);
                    let request: RunRequest = serde_json::from_value(params).unwrap();
                    if let Some(kind) = self.run_delivery {
                        // Out-of-band delivery, routed before the response
                        // resolves — exactly like the real reader task.
                        self.registry.dispatch(RunResult {
                            run_id: request.run_id as i64,
                            result_kind: kind,
                            elapsed_ms: 42.0,
                            message: Some("done".into()),
                        });
                    }
                    Ok(Value::Null)
                }
                _ => Ok(Value::Null),
            }
        }
    }

    struct StaticResolver {
        library: ResolvedLibrary,
        upgrades: ResolvedUpgrades,
        upgrade_resolutions: AtomicUsize,
        fail_metadata: bool,
    }

    #[async_trait]
    impl MetadataResolver for StaticResolver {
        async fn resolve_library_path(
            &self,
            _search_dirs: &[PathBuf],
            _query_path: &Path,
        ) -> Result<ResolvedLibrary, ClientError> {
            Ok(self.library.clone())
        }

        async fn resolve_upgrades(
            &self,
            _schema_path: &Path,
            _search_dirs: &[PathBuf],
        ) -> Result<ResolvedUpgrades, ClientError> {
            self.upgrade_resolutions.fetch_add(1, Ordering::SeqCst);
            Ok(self.upgrades.clone())
        }

        async fn resolve_metadata(
            &self,
            _query_path: &Path,
        ) -> Result<QueryMetadata, ClientError> {
            if self.fail_metadata {
                return Err(ClientError::Resolver("metadata unavailable".into()));
            }
            Ok(QueryMetadata {
                name: Some("Sample query".into()),
                ..QueryMetadata::default()
            })
        }
    }

    struct NoopUpgrader;

    #[async_trait]
    impl DatabaseUpgrader for NoopUpgrader {
        async fn upgrade(
            &self,
            _database: &Database,
            _target_schema: &Path,
            _scripts: &[PathBuf],
        ) -> Result<(), ClientError> {
            Ok(())
        }
    }

    // =========================================================================
    // Fixture
    // =========================================================================

    struct Fixture {
        _tmp: tempfile::TempDir,
        database: Database,
        query_path: PathBuf,
        lib_schema: PathBuf,
        db_schema: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let db_dir = tmp.path().join("db");
        let dataset = db_dir.join("dataset");
        std::fs::create_dir_all(&dataset).unwrap();
        let db_schema = db_dir.join("schemaA.dbscheme");
        std::fs::write(&db_schema, "relation a(int x)").unwrap();

        let lib_dir = tmp.path().join("lib");
        std::fs::create_dir_all(&lib_dir).unwrap();
        let lib_schema = lib_dir.join("schemaA.dbscheme");
        std::fs::write(&lib_schema, "relation a(int x)").unwrap();

        let query_path = tmp.path().join("queryA.ql");
        std::fs::write(&query_path, "select 1").unwrap();

        let database = Database {
            name: "sample".into(),
            path: db_dir,
            dataset_dir: Some(dataset),
            schema_path: Some(db_schema.clone()),
            source_metadata: None,
        };
        Fixture {
            _tmp: tmp,
            database,
            query_path,
            lib_schema,
            db_schema,
        }
    }

    fn resolver_for(f: &Fixture) -> Arc<StaticResolver> {
        Arc::new(StaticResolver {
            library: ResolvedLibrary {
                library_path: vec![f.lib_schema.parent().unwrap().to_path_buf()],
                schema_path: f.lib_schema.clone(),
            },
            upgrades: ResolvedUpgrades {
                scripts: Vec::new(),
                final_schema_path: f.db_schema.clone(),
            },
            upgrade_resolutions: AtomicUsize::new(0),
            fail_metadata: false,
        })
    }

    fn runner(
        f: &Fixture,
        transport: Arc<ScriptedTransport>,
        registry: Arc<RunResultRegistry>,
        resolver: Arc<StaticResolver>,
    ) -> QueryRunner {
        QueryRunner::new(
            Arc::new(QueryServerClient::new(transport, registry)),
            resolver,
            Arc::new(NoopUpgrader),
            Arc::new(ArtifactWorkspace::new().unwrap()),
            vec![f.lib_schema.parent().unwrap().to_path_buf()],
        )
    }

    fn diag(message: &str, line: u32, start: u32, end_line: u32, end: u32) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            position: Position {
                file: PathBuf::from("queryA.ql"),
                start_line: line,
                start_column: start,
                end_line,
                end_column: end,
            },
        }
    }

    // =========================================================================
    // Scenarios
    // =========================================================================

    #[tokio::test]
    async fn test_success_runs_once_and_returns_the_outcome_verbatim() {
        let f = fixture();
        let registry = RunResultRegistry::new();
        let transport = Arc::new(ScriptedTransport::new(registry.clone()));
        let resolver = resolver_for(&f);
        let runner = runner(&f, transport.clone(), registry, resolver);

        let result = runner
            .compile_and_run(
                &f.database,
                &f.query_path,
                None,
                HashMap::new(),
                300,
                &SilentProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(transport.compile_calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.run_calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.outcome.result_kind, ResultKind::Success);
        assert_eq!(result.outcome.elapsed_ms, 42.0);
        assert_eq!(result.outcome.message.as_deref(), Some("done"));
        assert_eq!(
            result.outcome.run_id as u64,
            result.outcome.correlation_id
        );
        assert!(result.succeeded());
        assert_eq!(result.database.name, "sample");
        assert_eq!(result.history.label.as_deref(), Some("Sample query"));
    }

    #[tokio::test]
    async fn test_compile_errors_skip_the_run_and_synthesize_an_outcome() {
        let f = fixture();
        let registry = RunResultRegistry::new();
        let mut transport = ScriptedTransport::new(registry.clone());
        transport.diagnostics = vec![
            diag("unresolved predicate", 3, 1, 3, 10),
            diag("type mismatch", 7, 2, 7, 5),
        ];
        let transport = Arc::new(transport);
        let resolver = resolver_for(&f);
        let runner = runner(&f, transport.clone(), registry, resolver);

        let result = runner
            .compile_and_run(
                &f.database,
                &f.query_path,
                None,
                HashMap::new(),
                300,
                &SilentProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(transport.run_calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.outcome.result_kind, ResultKind::OtherError);
        assert_eq!(
            result.outcome.message.as_deref(),
            Some("Query had compilation errors")
        );
    }

    #[tokio::test]
    async fn test_cancellation_during_compile_is_terminal() {
        let f = fixture();
        let registry = RunResultRegistry::new();
        let mut transport = ScriptedTransport::new(registry.clone());
        transport.cancel_compile = true;
        let transport = Arc::new(transport);
        let resolver = resolver_for(&f);
        let runner = runner(&f, transport.clone(), registry, resolver);

        let result = runner
            .compile_and_run(
                &f.database,
                &f.query_path,
                None,
                HashMap::new(),
                300,
                &SilentProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(transport.run_calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.outcome.result_kind, ResultKind::Cancelled);
        assert_eq!(result.outcome.message.as_deref(), Some("Query cancelled"));
    }

    #[tokio::test]
    async fn test_schema_basename_mismatch_fails_before_reconciliation() {
        let f = fixture();
        let other_schema = f.lib_schema.parent().unwrap().join("schemaB.dbscheme");
        std::fs::write(&other_schema, "relation b(int x)").unwrap();

        let registry = RunResultRegistry::new();
        let transport = Arc::new(ScriptedTransport::new(registry.clone()));
        let resolver = Arc::new(StaticResolver {
            library: ResolvedLibrary {
                library_path: Vec::new(),
                schema_path: other_schema,
            },
            upgrades: ResolvedUpgrades {
                scripts: Vec::new(),
                final_schema_path: f.db_schema.clone(),
            },
            upgrade_resolutions: AtomicUsize::new(0),
            fail_metadata: false,
        });
        let runner = runner(&f, transport.clone(), registry, resolver.clone());

        let err = runner
            .compile_and_run(
                &f.database,
                &f.query_path,
                None,
                HashMap::new(),
                300,
                &SilentProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ClientError::Core(CoreError::IncompatibleSchema(_))
        ));
        // The hash-based reconciliation never ran.
        assert_eq!(resolver.upgrade_resolutions.load(Ordering::SeqCst), 0);
        assert_eq!(transport.compile_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_without_result_synthesizes_no_result_outcome() {
        let f = fixture();
        let registry = RunResultRegistry::new();
        let mut transport = ScriptedTransport::new(registry.clone());
        transport.run_delivery = None;
        let transport = Arc::new(transport);
        let resolver = resolver_for(&f);
        let runner = runner(&f, transport.clone(), registry, resolver);

        let result = runner
            .compile_and_run(
                &f.database,
                &f.query_path,
                None,
                HashMap::new(),
                300,
                &SilentProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.outcome.result_kind, ResultKind::OtherError);
        assert_eq!(
            result.outcome.message.as_deref(),
            Some("No result from server")
        );
        assert_eq!(result.outcome.run_id, -1);
    }

    #[tokio::test]
    async fn test_metadata_failure_is_swallowed() {
        let f = fixture();
        let registry = RunResultRegistry::new();
        let transport = Arc::new(ScriptedTransport::new(registry.clone()));
        let base = resolver_for(&f);
        let resolver = Arc::new(StaticResolver {
            library: base.library.clone(),
            upgrades: base.upgrades.clone(),
            upgrade_resolutions: AtomicUsize::new(0),
            fail_metadata: true,
        });
        let runner = runner(&f, transport, registry, resolver);

        let result = runner
            .compile_and_run(
                &f.database,
                &f.query_path,
                None,
                HashMap::new(),
                300,
                &SilentProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // The evaluation still succeeded; the label fell back to the file name.
        assert!(result.succeeded());
        assert_eq!(result.history.label.as_deref(), Some("queryA.ql"));
    }

    #[tokio::test]
    async fn test_missing_database_schema_is_invalid() {
        let f = fixture();
        let mut database = f.database.clone();
        database.schema_path = None;
        let registry = RunResultRegistry::new();
        let transport = Arc::new(ScriptedTransport::new(registry.clone()));
        let resolver = resolver_for(&f);
        let runner = runner(&f, transport, registry, resolver);

        let err = runner
            .compile_and_run(
                &database,
                &f.query_path,
                None,
                HashMap::new(),
                300,
                &SilentProgress,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Core(CoreError::InvalidDatabase(_))
        ));
    }
}
