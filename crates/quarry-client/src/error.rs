//! # Client Errors
//!
//! Errors that cross the client crate's boundary. Cancellation is folded
//! into a dedicated variant so callers can turn it into a terminal
//! `Cancelled` outcome instead of treating it as a failure.

use thiserror::Error;

use quarry_core::CoreError;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Connection-level failure. Not recovered — there is no meaningful
    /// partial result to hand back.
    #[error("transport: {0}")]
    Transport(TransportError),

    /// The in-flight request was cancelled by the user or a timeout.
    #[error("operation cancelled")]
    Cancelled,

    /// The external metadata resolver failed.
    #[error("metadata resolver failed: {0}")]
    Resolver(String),

    /// The external database upgrade failed; the message is the upstream
    /// error, unmodified.
    #[error("database upgrade failed: {0}")]
    Upgrade(String),
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Cancelled => Self::Cancelled,
            other => Self::Transport(other),
        }
    }
}
