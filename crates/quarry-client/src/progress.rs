//! # Progress Reporting
//!
//! Advisory progress updates for long compile/run phases. Sinks must not
//! block — a slow or absent sink never delays completion.

/// One incremental progress update.
#[derive(Debug, Clone)]
pub struct Progress {
    pub step: u32,
    pub max_step: u32,
    pub message: String,
}

/// Receives progress updates. Implementations must return promptly.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: Progress);
}

/// Discards all updates.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn report(&self, _progress: Progress) {}
}

/// Logs updates via tracing. The default sink for CLI use.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, progress: Progress) {
        tracing::info!(
            "[{}/{}] {}",
            progress.step,
            progress.max_step,
            progress.message
        );
    }
}
