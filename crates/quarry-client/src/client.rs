//! # Compile-Run Protocol Client
//!
//! The two request/response exchanges against the evaluation server:
//! compile the query, then run the compiled plan. Both are cancellable and
//! both report progress. Run results arrive out-of-band and are matched up
//! through the [`RunResultRegistry`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use quarry_core::{
    canonical_path, Database, Diagnostic, EvaluationOutcome, EvaluationSession, QuickEvalCursor,
    Severity,
};

use crate::callbacks::RunResultRegistry;
use crate::error::ClientError;
use crate::progress::{Progress, ProgressSink};
use crate::protocol::{
    methods, ClearCacheRequest, ClearCacheResult, CompilationTarget, CompileOptions,
    CompileRequest, CompileResponse, ProgramSpec, RunRequest, RunSpec, DEFAULT_WORKING_SET,
};
use crate::transport::{EvaluationTransport, TransportError};

/// Client for one long-lived evaluation-server connection. Cheap to share;
/// many sessions may compile and run through it concurrently.
pub struct QueryServerClient {
    transport: Arc<dyn EvaluationTransport>,
    callbacks: Arc<RunResultRegistry>,
    next_correlation: AtomicU64,
}

impl QueryServerClient {
    /// `callbacks` must be the same registry the transport routes its
    /// events into.
    pub fn new(transport: Arc<dyn EvaluationTransport>, callbacks: Arc<RunResultRegistry>) -> Self {
        Self {
            transport,
            callbacks,
            next_correlation: AtomicU64::new(1),
        }
    }

    /// Compile the session's query. Returns only ERROR-severity
    /// diagnostics; warnings are logged and do not block execution.
    pub async fn compile(
        &self,
        session: &EvaluationSession,
        timeout_secs: u64,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>, ClientError> {
        let result = self.compile_inner(session, timeout_secs, progress, cancel).await;
        // Completion marker for diagnosability, on every exit path.
        tracing::info!(
            "compile finished for session {} ({})",
            session.id(),
            if result.is_ok() { "ok" } else { "failed" }
        );
        result
    }

    async fn compile_inner(
        &self,
        session: &EvaluationSession,
        timeout_secs: u64,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<Diagnostic>, ClientError> {
        progress.report(Progress {
            step: 1,
            max_step: 2,
            message: format!(
                "Compiling {}",
                session.program().query_path.display()
            ),
        });

        let program = ProgramSpec {
            library_path: canonical_paths(&session.program().library_path)?,
            schema_path: canonical_path(&session.program().schema_path)?,
            query_path: canonical_path(&session.program().query_path)?,
        };
        let target = match session.quick_eval() {
            Some(cursor) => CompilationTarget::QuickEval {
                cursor: QuickEvalCursor {
                    file: canonical_path(&cursor.file)?,
                    ..cursor.clone()
                },
            },
            None => CompilationTarget::Query,
        };
        let request = CompileRequest {
            program,
            options: CompileOptions::default(),
            target,
            artifact_path: session.plan_path().to_path_buf(),
            timeout_secs,
        };

        let params = serde_json::to_value(&request)
            .map_err(|e| ClientError::Transport(TransportError::Protocol(e.to_string())))?;
        let value = self
            .transport
            .request(methods::COMPILE, params, cancel)
            .await?;
        let response: CompileResponse = serde_json::from_value(value)
            .map_err(|e| ClientError::Transport(TransportError::Protocol(e.to_string())))?;

        let (errors, warnings): (Vec<_>, Vec<_>) = response
            .diagnostics
            .into_iter()
            .partition(|d| d.severity == Severity::Error);
        for warning in &warnings {
            tracing::warn!("{warning}");
        }
        Ok(errors)
    }

    /// Run the compiled plan. Only valid after a compile that returned
    /// zero errors. Always produces a terminal outcome, never silence: a
    /// resolved request with no delivered result synthesizes one.
    pub async fn run(
        &self,
        session: &EvaluationSession,
        timeout_secs: u64,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<EvaluationOutcome, ClientError> {
        let correlation_id = self.next_correlation.fetch_add(1, Ordering::SeqCst);
        // Register before sending so a fast result cannot slip past.
        // The guard unregisters on every exit path.
        let (_guard, mut receiver) = self.callbacks.register(correlation_id);

        progress.report(Progress {
            step: 2,
            max_step: 2,
            message: format!(
                "Running {}",
                session.program().query_path.display()
            ),
        });

        let request = RunRequest {
            artifact_path: session.plan_path().to_path_buf(),
            results_path: session.tuples_path().to_path_buf(),
            dataset: RunSpec {
                dataset_dir: canonical_path(session.database().dataset_dir()?)?,
                working_set: DEFAULT_WORKING_SET.to_string(),
            },
            run_id: correlation_id,
            timeout_secs,
            stop_on_error: false,
            template_values: session.template_values().clone(),
        };
        let params = serde_json::to_value(&request)
            .map_err(|e| ClientError::Transport(TransportError::Protocol(e.to_string())))?;
        self.transport.request(methods::RUN, params, cancel).await?;

        // The request resolving means the batch finished server-side; its
        // result travels out-of-band and is routed by the reader before
        // the response, so it is already here — or it never will be.
        match receiver.try_recv() {
            Ok(result) => Ok(EvaluationOutcome {
                result_kind: result.result_kind,
                elapsed_ms: result.elapsed_ms,
                message: result.message,
                run_id: result.run_id,
                correlation_id,
            }),
            Err(_) => {
                tracing::warn!("run {correlation_id} resolved without a result");
                Ok(EvaluationOutcome::missing(correlation_id))
            }
        }
    }

    /// Whether this database's results can be rendered as structured
    /// findings. Absence is explained in the log, never an error.
    pub fn has_interpreted_results(&self, database: &Database) -> bool {
        database.has_interpreted_results()
    }

    /// Ask the server to drop cached intermediates for a dataset.
    pub async fn clear_cache(
        &self,
        database: &Database,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<ClearCacheResult, ClientError> {
        let request = ClearCacheRequest {
            dataset_dir: canonical_path(database.dataset_dir()?)?,
            dry_run,
        };
        let params = serde_json::to_value(&request)
            .map_err(|e| ClientError::Transport(TransportError::Protocol(e.to_string())))?;
        let value = self
            .transport
            .request(methods::CLEAR_CACHE, params, cancel)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::Transport(TransportError::Protocol(e.to_string())))
    }
}

fn canonical_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>, ClientError> {
    paths
        .iter()
        .map(|p| canonical_path(p).map_err(ClientError::from))
        .collect()
}
