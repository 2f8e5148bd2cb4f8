//! # quarry-client — The Wire
//!
//! Everything between a constructed evaluation session and its terminal
//! outcome: the JSON-lines transport to the evaluation server, the
//! compile-run protocol client, the run-result callback registry, the
//! schema-compatibility resolver, and the orchestrator that ties the
//! pipeline together.
//!
//! External collaborators (the metadata-resolver toolchain and the
//! database upgrader) sit behind traits in [`resolver`]; the query and
//! cursor selection step is the caller's concern.

pub mod callbacks;
pub mod client;
pub mod compat;
pub mod error;
pub mod orchestrator;
pub mod progress;
pub mod protocol;
pub mod resolver;
pub mod transport;

pub use callbacks::{CallbackGuard, RunResultRegistry};
pub use client::QueryServerClient;
pub use compat::reconcile_schemas;
pub use error::ClientError;
pub use orchestrator::QueryRunner;
pub use progress::{LogProgress, Progress, ProgressSink, SilentProgress};
pub use protocol::{ClearCacheResult, RunResult, ServerEvent};
pub use resolver::{
    CliDatabaseUpgrader, CliMetadataResolver, DatabaseUpgrader, MetadataResolver, ResolvedLibrary,
    ResolvedUpgrades,
};
pub use transport::{EvaluationTransport, EventSink, JsonLineTransport, TransportError};
