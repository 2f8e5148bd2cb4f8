//! # Schema Compatibility
//!
//! Decides whether a query's expected schema and a database's actual
//! schema are identical, upgradeable, or incompatible — by content hash,
//! never by version metadata — and drives the upgrade when one is needed.

use std::path::{Path, PathBuf};

use quarry_core::{CoreError, Database, SchemaHash};

use crate::error::ClientError;
use crate::progress::{Progress, ProgressSink};
use crate::resolver::{DatabaseUpgrader, MetadataResolver};

/// Reconcile the database's schema with the one the query's library
/// expects. May invoke the external upgrade. Fails with
/// `IncompatibleSchema` when no upgrade path reaches the expected schema.
pub async fn reconcile_schemas(
    database: &Database,
    expected_schema: &Path,
    search_path: &[PathBuf],
    resolver: &dyn MetadataResolver,
    upgrader: &dyn DatabaseUpgrader,
    progress: &dyn ProgressSink,
) -> Result<(), ClientError> {
    // A database without a schema file has nothing to check against.
    let Some(db_schema) = database.schema_path.as_deref() else {
        tracing::debug!(
            "database '{}' exposes no schema file; skipping compatibility check",
            database.name
        );
        return Ok(());
    };

    let upgrades = resolver.resolve_upgrades(db_schema, search_path).await?;

    let of_db = SchemaHash::of_file(db_schema)?;
    let of_lib = SchemaHash::of_file(expected_schema)?;
    let upgradable_to = SchemaHash::of_file(&upgrades.final_schema_path)?;

    if upgradable_to != of_lib {
        return Err(CoreError::IncompatibleSchema(format!(
            "query expects schema {} ({of_lib}), but database schema {} upgrades at best to {} \
             ({upgradable_to}); use a library version matching the database",
            expected_schema.display(),
            db_schema.display(),
            upgrades.final_schema_path.display(),
        ))
        .into());
    }

    if of_db == of_lib {
        tracing::debug!("database schema already matches the query library ({of_lib})");
        return Ok(());
    }

    progress.report(Progress {
        step: 1,
        max_step: 1,
        message: format!("Upgrading database '{}'", database.name),
    });
    tracing::info!(
        "upgrading database '{}': {of_db} -> {of_lib} via {} script(s)",
        database.name,
        upgrades.scripts.len()
    );
    upgrader
        .upgrade(database, &upgrades.final_schema_path, &upgrades.scripts)
        .await
}
