//! # External Seams
//!
//! The metadata resolver and the database upgrader are external
//! collaborators — a CLI toolchain and a migration runner we treat as
//! black boxes. Traits keep the seams mockable; [`CliMetadataResolver`]
//! is the production binding that shells out and parses JSON.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use quarry_core::{Database, QueryMetadata};

use crate::error::ClientError;

/// Library resolution for one query: where its imports live and which
/// schema that library stack expects.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedLibrary {
    pub library_path: Vec<PathBuf>,
    pub schema_path: PathBuf,
}

/// The upgrade chain rooted at a database's current schema: the scripts to
/// apply, in order, and the schema the chain ultimately reaches.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedUpgrades {
    pub scripts: Vec<PathBuf>,
    pub final_schema_path: PathBuf,
}

/// External metadata resolution.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve_library_path(
        &self,
        search_dirs: &[PathBuf],
        query_path: &Path,
    ) -> Result<ResolvedLibrary, ClientError>;

    async fn resolve_upgrades(
        &self,
        schema_path: &Path,
        search_dirs: &[PathBuf],
    ) -> Result<ResolvedUpgrades, ClientError>;

    /// Best-effort: callers are expected to swallow and log failures.
    async fn resolve_metadata(&self, query_path: &Path) -> Result<QueryMetadata, ClientError>;
}

/// External database migration. Errors propagate unmodified.
#[async_trait]
pub trait DatabaseUpgrader: Send + Sync {
    async fn upgrade(
        &self,
        database: &Database,
        target_schema: &Path,
        scripts: &[PathBuf],
    ) -> Result<(), ClientError>;
}

/// Shells out to the external toolchain binary:
/// `<bin> resolve <what> --format json ...`, stdout is the JSON payload.
pub struct CliMetadataResolver {
    binary: PathBuf,
}

impl CliMetadataResolver {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn invoke<T: DeserializeOwned>(&self, args: Vec<OsString>) -> Result<T, ClientError> {
        let output = tokio::process::Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                ClientError::Resolver(format!("could not run {}: {e}", self.binary.display()))
            })?;
        if !output.status.success() {
            return Err(ClientError::Resolver(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        serde_json::from_slice(&output.stdout).map_err(|e| {
            ClientError::Resolver(format!(
                "unparseable output from {}: {e}",
                self.binary.display()
            ))
        })
    }
}

fn base_args(subcommand: &str) -> Vec<OsString> {
    vec![
        OsString::from("resolve"),
        OsString::from(subcommand),
        OsString::from("--format"),
        OsString::from("json"),
    ]
}

fn push_search_dirs(args: &mut Vec<OsString>, search_dirs: &[PathBuf]) {
    for dir in search_dirs {
        args.push(OsString::from("--search-path"));
        args.push(dir.clone().into_os_string());
    }
}

#[async_trait]
impl MetadataResolver for CliMetadataResolver {
    async fn resolve_library_path(
        &self,
        search_dirs: &[PathBuf],
        query_path: &Path,
    ) -> Result<ResolvedLibrary, ClientError> {
        let mut args = base_args("library-path");
        push_search_dirs(&mut args, search_dirs);
        args.push(query_path.as_os_str().to_os_string());
        self.invoke(args).await
    }

    async fn resolve_upgrades(
        &self,
        schema_path: &Path,
        search_dirs: &[PathBuf],
    ) -> Result<ResolvedUpgrades, ClientError> {
        let mut args = base_args("upgrades");
        push_search_dirs(&mut args, search_dirs);
        args.push(schema_path.as_os_str().to_os_string());
        self.invoke(args).await
    }

    async fn resolve_metadata(&self, query_path: &Path) -> Result<QueryMetadata, ClientError> {
        let mut args = base_args("metadata");
        args.push(query_path.as_os_str().to_os_string());
        self.invoke(args).await
    }
}

/// Runs upgrade scripts through the same external toolchain:
/// `<bin> upgrade <dataset> --target <schema> [scripts...]`.
pub struct CliDatabaseUpgrader {
    binary: PathBuf,
}

impl CliDatabaseUpgrader {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl DatabaseUpgrader for CliDatabaseUpgrader {
    async fn upgrade(
        &self,
        database: &Database,
        target_schema: &Path,
        scripts: &[PathBuf],
    ) -> Result<(), ClientError> {
        let dataset = database.dataset_dir()?;
        let mut args = vec![
            OsString::from("upgrade"),
            dataset.as_os_str().to_os_string(),
            OsString::from("--target"),
            target_schema.as_os_str().to_os_string(),
        ];
        for script in scripts {
            args.push(script.clone().into_os_string());
        }
        let output = tokio::process::Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                ClientError::Upgrade(format!("could not run {}: {e}", self.binary.display()))
            })?;
        if !output.status.success() {
            return Err(ClientError::Upgrade(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        tracing::info!(
            "upgraded database '{}' to schema {}",
            database.name,
            target_schema.display()
        );
        Ok(())
    }
}
