//! # Artifact Workspace
//!
//! One temporary directory per process, created at startup and torn down at
//! shutdown. Every evaluation session allocates its artifact paths inside
//! it, namespaced by a process-unique session id, so concurrent sessions
//! never write to the same file.
//!
//! The workspace is an explicit context object passed to whoever needs it —
//! there is no ambient global.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tempfile::TempDir;

/// Process-wide home for evaluation artifacts.
pub struct ArtifactWorkspace {
    dir: TempDir,
    next_id: AtomicU64,
}

impl ArtifactWorkspace {
    /// Create the workspace directory. Call once at process start.
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("quarry-").tempdir()?;
        tracing::debug!("artifact workspace at {}", dir.path().display());
        Ok(Self {
            dir,
            next_id: AtomicU64::new(0),
        })
    }

    /// Root directory all session artifacts live under.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Allocate a fresh session id.
    ///
    /// A single atomic fetch-add, so ids are unique even when sessions are
    /// constructed concurrently from many tasks.
    pub fn next_session_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Path of the compiled query plan for session `id`.
    pub fn plan_path(&self, id: u64) -> PathBuf {
        self.root().join(format!("query-{id}.plan"))
    }

    /// Path of the raw tuple results for session `id`.
    pub fn tuples_path(&self, id: u64) -> PathBuf {
        self.root().join(format!("query-{id}.tuples"))
    }

    /// Path of the interpreted findings for session `id`.
    pub fn findings_path(&self, id: u64) -> PathBuf {
        self.root().join(format!("query-{id}.findings"))
    }

    /// Delete the workspace and everything in it. Call once at shutdown.
    ///
    /// Dropping the workspace also removes the directory; this variant
    /// surfaces the io error instead of swallowing it.
    pub fn teardown(self) -> io::Result<()> {
        self.dir.close()
    }
}
