//! # Access processor
//!
//! The thread-safe front door. Any number of application threads (and
//! the dispatcher's completion callbacks) funnel their requests through
//! one multi-producer queue into the analyser. Submission is either
//! fire-and-forget (`submit_task`, `task_ended`) or parks the caller on
//! a one-shot reply (`main_access`, `barrier`, `end_of_app`).
//!
//! Requests from one thread are processed in submission order;
//! cross-thread ordering is the queue's arrival order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::app::{AppStatus, AppSummary};
use crate::data_info::DataAccessGrant;
use crate::dispatcher::TaskOutcome;
use crate::error::{SubmissionError, TaskException, WaitError};
use crate::request::{
    BarrierRequest, EndOfAppRequest, MainAccessRequest, NewTaskRequest, Request, TaskEndedRequest,
};
use crate::task::{ExecutionHandle, Task, TaskDescription};
use crate::types::{AppId, DataRef, Direction, TaskId};

// ============================================================================
// ACCESS PROCESSOR
// ============================================================================

/// Cloneable handle for submitting requests to the runtime.
#[derive(Clone)]
pub struct AccessProcessor {
    tx: mpsc::UnboundedSender<Request>,
    /// Process-wide task id counter; the first task gets id 1.
    next_task_id: Arc<AtomicU64>,
    /// Analyser-published application status, consulted synchronously.
    status_board: Arc<DashMap<AppId, AppStatus>>,
    closed: Arc<AtomicBool>,
}

impl AccessProcessor {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<Request>,
        status_board: Arc<DashMap<AppId, AppStatus>>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tx,
            next_task_id: Arc::new(AtomicU64::new(TaskId::FIRST.as_u64())),
            status_board,
            closed,
        }
    }

    // ------------------------------------------------------------------
    // fire-and-forget
    // ------------------------------------------------------------------

    /// Allocate a task id and enqueue the task for analysis. Returns
    /// immediately; dependencies are discovered by the analyser.
    pub fn submit_task(
        &self,
        app: AppId,
        description: TaskDescription,
    ) -> Result<TaskId, SubmissionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubmissionError::QueueClosed);
        }
        description.validate()?;
        if let Some(status) = self.status_board.get(&app) {
            match *status {
                AppStatus::Active => {}
                AppStatus::Ending | AppStatus::Finished => {
                    return Err(SubmissionError::AppFinished(app));
                }
                AppStatus::Aborted => return Err(SubmissionError::QueueClosed),
            }
        }

        let id = TaskId::from_raw(self.next_task_id.fetch_add(1, Ordering::SeqCst));
        let task = Task::new(id, app, description);
        debug!(task = %id, %app, "submitting task");
        self.send(Request::NewTask(NewTaskRequest {
            task,
            exception: None,
        }))?;
        Ok(id)
    }

    /// Completion callback for the dispatcher.
    pub fn task_ended(&self, task: TaskId, outcome: TaskOutcome) -> Result<(), SubmissionError> {
        self.task_ended_with(task, outcome, None, None)
    }

    /// Completion callback carrying the execution handle and a user
    /// exception, when the worker reported one.
    pub fn task_ended_with(
        &self,
        task: TaskId,
        outcome: TaskOutcome,
        handle: Option<ExecutionHandle>,
        exception: Option<TaskException>,
    ) -> Result<(), SubmissionError> {
        self.send(Request::TaskEnded(TaskEndedRequest {
            task,
            outcome,
            handle,
            exception,
        }))
    }

    // ------------------------------------------------------------------
    // blocking operations
    // ------------------------------------------------------------------

    /// Access a datum from the application's main thread. Resolves once
    /// the producing tasks have finished; the grant names the version
    /// to read or the one just registered for writing.
    pub async fn main_access(
        &self,
        app: AppId,
        data: DataRef,
        direction: Direction,
    ) -> Result<DataAccessGrant, WaitError> {
        let (reply, rx) = oneshot::channel();
        self.send_for_wait(Request::MainAccess(MainAccessRequest {
            app,
            data,
            direction,
            reply,
        }))?;
        Self::await_reply(rx, None).await?
    }

    /// Block until every task this application submitted before the
    /// call is terminal.
    pub async fn barrier(&self, app: AppId) -> Result<AppSummary, WaitError> {
        self.barrier_inner(app, None).await
    }

    /// Barrier with a caller-supplied timeout. On `Timeout` the graph
    /// is untouched and the tasks keep running.
    pub async fn barrier_with_timeout(
        &self,
        app: AppId,
        limit: Duration,
    ) -> Result<AppSummary, WaitError> {
        self.barrier_inner(app, Some(limit)).await
    }

    async fn barrier_inner(
        &self,
        app: AppId,
        limit: Option<Duration>,
    ) -> Result<AppSummary, WaitError> {
        let (reply, rx) = oneshot::channel();
        self.send_for_wait(Request::Barrier(BarrierRequest { app, reply }))?;
        Self::await_reply(rx, limit).await
    }

    /// Declare that the application submits no more tasks and block
    /// until all of them are terminal. The summary reports the failure
    /// aggregate; later submissions for this application are rejected.
    pub async fn end_of_app(&self, app: AppId) -> Result<AppSummary, WaitError> {
        self.end_of_app_inner(app, None).await
    }

    pub async fn end_of_app_with_timeout(
        &self,
        app: AppId,
        limit: Duration,
    ) -> Result<AppSummary, WaitError> {
        self.end_of_app_inner(app, Some(limit)).await
    }

    async fn end_of_app_inner(
        &self,
        app: AppId,
        limit: Option<Duration>,
    ) -> Result<AppSummary, WaitError> {
        let (reply, rx) = oneshot::channel();
        self.send_for_wait(Request::EndOfApp(EndOfAppRequest { app, reply }))?;
        Self::await_reply(rx, limit).await
    }

    // ------------------------------------------------------------------
    // plumbing
    // ------------------------------------------------------------------

    fn send(&self, request: Request) -> Result<(), SubmissionError> {
        self.tx
            .send(request)
            .map_err(|_| SubmissionError::QueueClosed)
    }

    fn send_for_wait(&self, request: Request) -> Result<(), WaitError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WaitError::QueueClosed);
        }
        self.tx.send(request).map_err(|_| WaitError::QueueClosed)
    }

    /// Wait on a one-shot reply. A dropped sender means the analyser
    /// aborted (or shut down) before firing the signal.
    async fn await_reply<T>(
        rx: oneshot::Receiver<T>,
        limit: Option<Duration>,
    ) -> Result<T, WaitError> {
        match limit {
            None => rx.await.map_err(|_| WaitError::RuntimeAborted),
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Err(_) => Err(WaitError::Timeout),
                Ok(result) => result.map_err(|_| WaitError::RuntimeAborted),
            },
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> (AccessProcessor, mpsc::UnboundedReceiver<Request>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ap = AccessProcessor::new(
            tx,
            Arc::new(DashMap::new()),
            Arc::new(AtomicBool::new(false)),
        );
        (ap, rx)
    }

    #[test]
    fn ids_are_monotonic_from_one() {
        let (ap, _rx) = processor();
        let app = AppId::from_raw(1);
        let first = ap.submit_task(app, TaskDescription::method("a")).unwrap();
        let second = ap.submit_task(app, TaskDescription::method("b")).unwrap();
        assert_eq!(first, TaskId::FIRST);
        assert!(second > first);
    }

    #[test]
    fn malformed_descriptions_fail_synchronously() {
        let (ap, _rx) = processor();
        let err = ap
            .submit_task(AppId::from_raw(1), TaskDescription::method(""))
            .unwrap_err();
        assert!(matches!(err, SubmissionError::InvalidDescription(_)));
    }

    #[test]
    fn finished_apps_reject_tasks() {
        let (ap, _rx) = processor();
        let app = AppId::from_raw(4);
        ap.status_board.insert(app, AppStatus::Finished);
        assert_eq!(
            ap.submit_task(app, TaskDescription::method("late")),
            Err(SubmissionError::AppFinished(app))
        );
    }

    #[test]
    fn dropped_queue_means_closed() {
        let (ap, rx) = processor();
        drop(rx);
        assert_eq!(
            ap.submit_task(AppId::from_raw(1), TaskDescription::method("m")),
            Err(SubmissionError::QueueClosed)
        );
        assert_eq!(
            ap.task_ended(TaskId::FIRST, TaskOutcome::Success),
            Err(SubmissionError::QueueClosed)
        );
    }

    #[tokio::test]
    async fn closed_flag_rejects_waits() {
        let (ap, _rx) = processor();
        ap.closed.store(true, Ordering::SeqCst);
        assert!(matches!(
            ap.barrier(AppId::from_raw(1)).await,
            Err(WaitError::QueueClosed)
        ));
    }
}
