//! # Run-Result Registry
//!
//! Correlates out-of-band run results with the sessions waiting for them.
//! Each waiter is a single-use oneshot channel keyed by correlation id in
//! a shared table; a guard removes the entry on drop, so unregistration
//! happens on success, failure, and cancellation alike.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::protocol::{RunResult, ServerEvent};
use crate::transport::EventSink;

/// Shared table of pending run-result waiters.
#[derive(Default)]
pub struct RunResultRegistry {
    slots: Mutex<HashMap<u64, oneshot::Sender<RunResult>>>,
}

impl RunResultRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a waiter for `correlation_id`. The returned guard removes
    /// the registration when dropped.
    pub fn register(
        self: &Arc<Self>,
        correlation_id: u64,
    ) -> (CallbackGuard, oneshot::Receiver<RunResult>) {
        let (tx, rx) = oneshot::channel();
        self.slots.lock().unwrap().insert(correlation_id, tx);
        (
            CallbackGuard {
                registry: Arc::clone(self),
                correlation_id,
            },
            rx,
        )
    }

    /// Deliver a run result to whichever session is waiting for it.
    pub fn dispatch(&self, result: RunResult) {
        if result.run_id < 0 {
            tracing::warn!("run result with invalid run id {}", result.run_id);
            return;
        }
        let waiter = self.slots.lock().unwrap().remove(&(result.run_id as u64));
        match waiter {
            Some(tx) => {
                // The receiver may already be gone (cancelled run).
                let _ = tx.send(result);
            }
            None => tracing::debug!("no waiter registered for run {}", result.run_id),
        }
    }

    fn remove(&self, correlation_id: u64) {
        self.slots.lock().unwrap().remove(&correlation_id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

impl EventSink for RunResultRegistry {
    fn on_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::RunResult(result) => self.dispatch(result),
        }
    }
}

/// Removes a registration when dropped.
pub struct CallbackGuard {
    registry: Arc<RunResultRegistry>,
    correlation_id: u64,
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        self.registry.remove(self.correlation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::ResultKind;

    fn result(run_id: i64) -> RunResult {
        RunResult {
            run_id,
            result_kind: ResultKind::Success,
            elapsed_ms: 3.0,
            message: None,
        }
    }

    #[test]
    fn test_dispatch_completes_the_matching_waiter() {
        let registry = RunResultRegistry::new();
        let (_guard_a, mut rx_a) = registry.register(1);
        let (_guard_b, mut rx_b) = registry.register(2);

        registry.dispatch(result(2));

        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap().run_id, 2);
    }

    #[test]
    fn test_guard_drop_unregisters() {
        let registry = RunResultRegistry::new();
        {
            let (_guard, _rx) = registry.register(7);
            assert_eq!(registry.len(), 1);
        }
        assert_eq!(registry.len(), 0);
        // A late result for the vacated slot is dropped, not delivered.
        registry.dispatch(result(7));
    }

    #[test]
    fn test_dispatch_consumes_the_registration() {
        let registry = RunResultRegistry::new();
        let (_guard, mut rx) = registry.register(3);
        registry.dispatch(result(3));
        registry.dispatch(result(3));
        assert_eq!(rx.try_recv().unwrap().run_id, 3);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_concurrent_registration_is_safe() {
        let registry = RunResultRegistry::new();
        let mut handles = Vec::new();
        for t in 0..8u64 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                let mut guards = Vec::new();
                for i in 0..100u64 {
                    guards.push(registry.register(t * 1000 + i));
                }
                guards.len()
            }));
        }
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 800);
        // All guards dropped inside the threads.
        assert_eq!(registry.len(), 0);
    }
}
