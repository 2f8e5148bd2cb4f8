//! # Evaluation Server Transport
//!
//! Newline-delimited JSON over a single long-lived TCP connection. Many
//! sessions share the connection concurrently: every outgoing request
//! carries a connection-scoped id, a reader task demultiplexes responses
//! back to their waiters, and out-of-band server events are handed to an
//! [`EventSink`] *synchronously from the reader task*, so an event that
//! arrives on the wire before a response is observed before that response
//! resolves.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::protocol::{methods, ServerEvent};

/// Connection-level failures. [`TransportError::Cancelled`] is the
/// dedicated code callers use to tell cancellation apart from real
/// failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request cancelled")]
    Cancelled,

    #[error("connection closed")]
    Closed,

    #[error("transport io: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },
}

/// Receives out-of-band server events, synchronously from the reader task.
/// Implementations must not block.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: ServerEvent);
}

/// A request/response channel to the evaluation server.
#[async_trait]
pub trait EvaluationTransport: Send + Sync {
    /// Send one request and await its response. Honors `cancel`: a fired
    /// token resolves the call with [`TransportError::Cancelled`] and
    /// best-effort cancels the request server-side.
    ///
    /// Timeouts ride inside the request body and are enforced by the
    /// server; no local deadline is imposed here.
    async fn request(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, TransportError>;
}

// =============================================================================
// Wire envelopes
// =============================================================================

#[derive(Serialize)]
struct OutgoingEnvelope<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    params: &'a Value,
}

#[derive(Deserialize)]
struct IncomingEnvelope {
    id: Option<u64>,
    result: Option<Value>,
    error: Option<WireError>,
    event: Option<ServerEvent>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    code: i64,
    message: String,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, TransportError>>>>>;

// =============================================================================
// JSON-lines TCP transport
// =============================================================================

/// The production transport: one TCP connection, one reader task.
pub struct JsonLineTransport {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    next_request_id: AtomicU64,
}

impl JsonLineTransport {
    /// Connect to the server and spawn the reader task. Events are routed
    /// into `sink` for the life of the connection.
    pub async fn connect(addr: &str, sink: Arc<dyn EventSink>) -> io::Result<Arc<Self>> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream, sink))
    }

    /// Wrap an already-established connection.
    pub fn from_stream(stream: TcpStream, sink: Arc<dyn EventSink>) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let transport = Arc::new(Self {
            writer: tokio::sync::Mutex::new(write_half),
            pending: pending.clone(),
            next_request_id: AtomicU64::new(1),
        });
        tokio::spawn(read_loop(read_half, pending, sink));
        transport
    }

    async fn send_line(&self, line: &str) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    fn take_pending(&self, id: u64) -> Option<oneshot::Sender<Result<Value, TransportError>>> {
        self.pending.lock().unwrap().remove(&id)
    }
}

#[async_trait]
impl EvaluationTransport for JsonLineTransport {
    async fn request(
        &self,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, TransportError> {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(id, tx);

        let line = serde_json::to_string(&OutgoingEnvelope {
            id: Some(id),
            method,
            params: &params,
        })
        .map_err(|e| TransportError::Protocol(e.to_string()))?;

        if let Err(e) = self.send_line(&line).await {
            self.take_pending(id);
            return Err(e);
        }

        tokio::select! {
            response = rx => match response {
                Ok(result) => result,
                Err(_) => Err(TransportError::Closed),
            },
            () = cancel.cancelled() => {
                self.take_pending(id);
                // Best-effort in-flight cancel; the pending entry is
                // already gone, so a late response is dropped.
                let cancel_params = serde_json::json!({ "id": id });
                if let Ok(line) = serde_json::to_string(&OutgoingEnvelope {
                    id: None,
                    method: methods::CANCEL,
                    params: &cancel_params,
                }) {
                    let _ = self.send_line(&line).await;
                }
                Err(TransportError::Cancelled)
            }
        }
    }
}

/// Reader task: parse incoming lines, complete pending requests, and hand
/// events to the sink. On disconnect, every waiter resolves with `Closed`.
async fn read_loop(read_half: OwnedReadHalf, pending: PendingMap, sink: Arc<dyn EventSink>) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<IncomingEnvelope>(&line) {
                    Ok(envelope) => route(envelope, &pending, &sink),
                    Err(e) => tracing::warn!("undecodable server message: {e}"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("evaluation server connection error: {e}");
                break;
            }
        }
    }
    let waiters: Vec<_> = pending
        .lock()
        .unwrap()
        .drain()
        .collect();
    for (_, tx) in waiters {
        let _ = tx.send(Err(TransportError::Closed));
    }
    tracing::debug!("evaluation server connection closed");
}

fn route(envelope: IncomingEnvelope, pending: &PendingMap, sink: &Arc<dyn EventSink>) {
    if let Some(event) = envelope.event {
        sink.on_event(event);
        return;
    }
    let Some(id) = envelope.id else {
        tracing::warn!("server message with neither event nor id");
        return;
    };
    let Some(tx) = pending.lock().unwrap().remove(&id) else {
        // Cancelled or already-failed request; a late response is fine.
        tracing::debug!("dropping response for unknown request {id}");
        return;
    };
    let outcome = match (envelope.result, envelope.error) {
        (_, Some(err)) => Err(TransportError::Server {
            code: err.code,
            message: err.message,
        }),
        (Some(result), None) => Ok(result),
        (None, None) => Ok(Value::Null),
    };
    let _ = tx.send(outcome);
}
