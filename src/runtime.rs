//! # Runtime context
//!
//! Ties the components together without process-wide globals: the
//! request queue, the analyser task consuming it, the shared status
//! board and the task-id counter all live in one [`Runtime`] value.
//! Tests instantiate one runtime per case for isolation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::access::AccessProcessor;
use crate::analyser::TaskAnalyser;
use crate::dispatcher::TaskDispatcher;
use crate::error::WaitError;
use crate::graph::GraphSnapshot;
use crate::request::{Request, SnapshotRequest};

// ============================================================================
// RUNTIME
// ============================================================================

/// A running scheduler core.
///
/// Owns the analyser task; hand out cloned [`AccessProcessor`]s to
/// application threads and to the dispatcher for completions.
pub struct Runtime {
    access: AccessProcessor,
    tx: mpsc::UnboundedSender<Request>,
    closed: Arc<AtomicBool>,
    /// Taken by `shutdown`; `Drop` only acts while it is still here.
    analyser: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Spawn the analyser loop on the current tokio runtime.
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let status_board = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let analyser = TaskAnalyser::new(rx, dispatcher, Arc::clone(&status_board), Arc::clone(&closed));
        let handle = tokio::spawn(analyser.run());

        let access = AccessProcessor::new(tx.clone(), status_board, Arc::clone(&closed));
        Self {
            access,
            tx,
            closed,
            analyser: Some(handle),
        }
    }

    /// Submission handle; clone freely across threads.
    pub fn access(&self) -> AccessProcessor {
        self.access.clone()
    }

    /// Consistent point-in-time view of the live graph, serialized
    /// through the request queue.
    pub async fn snapshot(&self) -> Result<GraphSnapshot, WaitError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Snapshot(SnapshotRequest { reply }))
            .map_err(|_| WaitError::QueueClosed)?;
        rx.await.map_err(|_| WaitError::RuntimeAborted)
    }

    /// The queue no longer accepts requests (shutdown or fault).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the queue and wait for the analyser to drain. Requests
    /// already queued are dropped; their waiters observe
    /// `RuntimeAborted`.
    pub async fn shutdown(mut self) -> Result<(), WaitError> {
        debug!("runtime shutdown");
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Request::Shutdown);
        match self.analyser.take() {
            Some(handle) => handle.await.map_err(|_| WaitError::RuntimeAborted),
            None => Ok(()),
        }
    }
}

impl Drop for Runtime {
    /// Dropping the runtime closes the queue even while cloned
    /// `AccessProcessor` handles keep the channel alive: the shared
    /// closed flag rejects new submissions immediately, and the
    /// shutdown entry makes the analyser stop and drop every parked
    /// reply sender, so pending waiters observe `RuntimeAborted`.
    fn drop(&mut self) {
        if self.analyser.is_none() {
            // Explicit shutdown already ran.
            return;
        }
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Request::Shutdown);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::RecordingDispatcher;
    use crate::error::SubmissionError;
    use crate::task::TaskDescription;
    use crate::types::AppId;

    #[tokio::test]
    async fn snapshot_sees_submitted_tasks() {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let runtime = Runtime::new(dispatcher);
        let ap = runtime.access();

        let id = ap
            .submit_task(AppId::from_raw(1), TaskDescription::method("step"))
            .unwrap();

        let snapshot = runtime.snapshot().await.unwrap();
        assert!(snapshot.task(id).is_some());

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_the_queue() {
        let runtime = Runtime::new(Arc::new(RecordingDispatcher::new()));
        let ap = runtime.access();
        runtime.shutdown().await.unwrap();

        assert_eq!(
            ap.submit_task(AppId::from_raw(1), TaskDescription::method("late")),
            Err(SubmissionError::QueueClosed)
        );
    }

    #[tokio::test]
    async fn dropping_the_runtime_aborts_pending_waiters() {
        use std::pin::pin;
        use std::time::Duration;

        let runtime = Runtime::new(Arc::new(RecordingDispatcher::new()));
        let ap = runtime.access();
        let app = AppId::from_raw(1);

        // A running task keeps the barrier parked.
        ap.submit_task(app, TaskDescription::method("busy"))
            .unwrap();
        let mut barrier = pin!(ap.barrier(app));
        tokio::select! {
            _ = &mut barrier => panic!("barrier fired with a live task"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }

        drop(runtime);

        // The cloned handle outlives the runtime, yet the queue closes
        // and the parked waiter wakes.
        assert_eq!(barrier.await.unwrap_err(), WaitError::RuntimeAborted);
        assert_eq!(
            ap.submit_task(app, TaskDescription::method("late")),
            Err(SubmissionError::QueueClosed)
        );
    }
}
