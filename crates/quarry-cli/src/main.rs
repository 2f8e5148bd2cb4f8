//! # qry — QUARRY command line
//!
//! Front end for the compile-and-run pipeline:
//!
//! - `qry run --database <dir> --query <file>` — Compile and evaluate a
//!   query against a database.
//! - `qry clear-cache --database <dir>` — Drop cached intermediates for a
//!   dataset.
//!
//! Query/cursor selection niceties (extension checks, unsaved-edit
//! prompts) belong to richer front ends; this one takes explicit paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quarry_client::{
    CliDatabaseUpgrader, CliMetadataResolver, JsonLineTransport, LogProgress, QueryRunner,
    QueryServerClient, RunResultRegistry,
};
use quarry_core::{ArtifactWorkspace, Database, QuickEvalCursor};

#[derive(Parser)]
#[command(name = "qry", version, about, long_about = None)]
struct Cli {
    /// Path to the config file.
    #[arg(long, default_value = "quarry.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and run a query against a database.
    Run {
        /// Database directory.
        #[arg(long)]
        database: PathBuf,

        /// Query source file.
        #[arg(long)]
        query: PathBuf,

        /// Quick-evaluate only the selection `FILE:SL:SC:EL:EC`
        /// (1-based, end-inclusive).
        #[arg(long, value_name = "FILE:SL:SC:EL:EC")]
        quick_eval: Option<String>,

        /// Server-enforced evaluation timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// Additional library search directories.
        #[arg(long)]
        search_path: Vec<PathBuf>,

        /// Template parameter, `KEY=VALUE`. Repeatable.
        #[arg(long, value_name = "KEY=VALUE")]
        template: Vec<String>,

        /// Evaluation server address.
        #[arg(long)]
        server: Option<String>,
    },

    /// Clear the evaluation cache for a database's dataset.
    ClearCache {
        /// Database directory.
        #[arg(long)]
        database: PathBuf,

        /// Report what would be deleted without deleting it.
        #[arg(long)]
        dry_run: bool,

        /// Evaluation server address.
        #[arg(long)]
        server: Option<String>,
    },
}

// =============================================================================
// Config
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Config {
    server_addr: String,
    resolver_bin: PathBuf,
    search_path: Vec<PathBuf>,
    timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:9001".into(),
            resolver_bin: PathBuf::from("quarry-toolchain"),
            search_path: Vec::new(),
            timeout_secs: 300,
        }
    }
}

impl Config {
    fn load(path: &Path) -> Self {
        if path.exists() {
            let content = std::fs::read_to_string(path).unwrap_or_default();
            toml::from_str(&content).unwrap_or_default()
        } else {
            Self::default()
        }
    }
}

// =============================================================================
// Argument parsing helpers
// =============================================================================

/// Parse `FILE:SL:SC:EL:EC` into a quick-evaluation cursor.
fn parse_quick_eval(spec: &str) -> Result<QuickEvalCursor, String> {
    let parts: Vec<&str> = spec.rsplitn(5, ':').collect();
    if parts.len() != 5 {
        return Err(format!("expected FILE:SL:SC:EL:EC, got '{spec}'"));
    }
    // rsplitn yields the numbers first, file last.
    let numbers: Vec<u32> = parts[..4]
        .iter()
        .map(|p| p.parse().map_err(|_| format!("bad position in '{spec}'")))
        .collect::<Result<_, _>>()?;
    Ok(QuickEvalCursor {
        file: PathBuf::from(parts[4]),
        start_line: numbers[3],
        start_column: numbers[2],
        end_line: numbers[1],
        end_column: numbers[0],
    })
}

/// Parse repeated `KEY=VALUE` flags.
fn parse_templates(values: &[String]) -> Result<HashMap<String, String>, String> {
    values
        .iter()
        .map(|v| {
            v.split_once('=')
                .map(|(k, val)| (k.to_string(), val.to_string()))
                .ok_or_else(|| format!("expected KEY=VALUE, got '{v}'"))
        })
        .collect()
}

/// Open a database directory: the dataset lives under `dataset/`, the
/// schema is the single `*.dbscheme` inside it, and an optional
/// `database.yml` enables interpreted results.
fn open_database(path: &Path) -> Database {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let dataset = path.join("dataset");
    let dataset_dir = dataset.is_dir().then(|| dataset.clone());

    let schema_path = dataset_dir.as_deref().and_then(find_dbscheme);

    let metadata = path.join("database.yml");
    let source_metadata = metadata.exists().then_some(metadata);

    Database {
        name,
        path: path.to_path_buf(),
        dataset_dir,
        schema_path,
        source_metadata,
    }
}

fn find_dbscheme(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let p = entry.path();
        if p.extension().is_some_and(|e| e == "dbscheme") {
            return Some(p);
        }
    }
    None
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "qry=info,quarry_client=info,quarry_core=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config);

    let exit = match cli.command {
        Commands::Run {
            database,
            query,
            quick_eval,
            timeout,
            search_path,
            template,
            server,
        } => {
            run_query(
                &config, &database, &query, quick_eval, timeout, search_path, &template, server,
            )
            .await
        }
        Commands::ClearCache {
            database,
            dry_run,
            server,
        } => clear_cache(&config, &database, dry_run, server).await,
    };
    std::process::exit(exit);
}

async fn connect(config: &Config, server: Option<String>) -> Option<Arc<QueryServerClient>> {
    let addr = server.unwrap_or_else(|| config.server_addr.clone());
    let registry = RunResultRegistry::new();
    let transport = match JsonLineTransport::connect(&addr, registry.clone()).await {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("could not connect to evaluation server at {addr}: {e}");
            return None;
        }
    };
    Some(Arc::new(QueryServerClient::new(transport, registry)))
}

#[allow(clippy::too_many_arguments)]
async fn run_query(
    config: &Config,
    database: &Path,
    query: &Path,
    quick_eval: Option<String>,
    timeout: Option<u64>,
    mut search_path: Vec<PathBuf>,
    template: &[String],
    server: Option<String>,
) -> i32 {
    let cursor = match quick_eval.as_deref().map(parse_quick_eval).transpose() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{e}");
            return 2;
        }
    };
    let templates = match parse_templates(template) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("{e}");
            return 2;
        }
    };

    let Some(client) = connect(config, server).await else {
        return 1;
    };

    let workspace = match ArtifactWorkspace::new() {
        Ok(ws) => Arc::new(ws),
        Err(e) => {
            tracing::error!("could not create artifact workspace: {e}");
            return 1;
        }
    };

    search_path.extend(config.search_path.iter().cloned());
    let runner = QueryRunner::new(
        client,
        Arc::new(CliMetadataResolver::new(&config.resolver_bin)),
        Arc::new(CliDatabaseUpgrader::new(&config.resolver_bin)),
        workspace.clone(),
        search_path,
    );

    // Ctrl-C threads through both the compile and run requests.
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("cancellation requested");
            canceller.cancel();
        }
    });

    let db = open_database(database);
    let timeout_secs = timeout.unwrap_or(config.timeout_secs);
    let result = runner
        .compile_and_run(
            &db,
            query,
            cursor,
            templates,
            timeout_secs,
            &LogProgress,
            &cancel,
        )
        .await;

    let code = match result {
        Ok(results) => {
            let summary = serde_json::json!({
                "outcome": results.outcome,
                "database": results.database,
                "history": results.history,
                "tuples": results.session.tuples_path(),
                "findings": results
                    .session
                    .database()
                    .has_interpreted_results()
                    .then(|| results.session.findings_path()),
            });
            println!("{}", serde_json::to_string_pretty(&summary).unwrap());
            i32::from(!results.succeeded())
        }
        Err(e) => {
            tracing::error!("{e}");
            1
        }
    };

    // Runner dropped above only at scope end; tear the workspace down
    // explicitly once we are the last owner.
    drop(runner);
    if let Ok(ws) = Arc::try_unwrap(workspace) {
        if let Err(e) = ws.teardown() {
            tracing::warn!("could not remove artifact workspace: {e}");
        }
    }
    code
}

async fn clear_cache(
    config: &Config,
    database: &Path,
    dry_run: bool,
    server: Option<String>,
) -> i32 {
    let Some(client) = connect(config, server).await else {
        return 1;
    };
    let db = open_database(database);
    match client
        .clear_cache(&db, dry_run, &CancellationToken::new())
        .await
    {
        Ok(result) => {
            println!("{}", result.deletion_message);
            0
        }
        Err(e) => {
            tracing::error!("{e}");
            1
        }
    }
}
