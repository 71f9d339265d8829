//! # Requests
//!
//! The tagged values travelling on the analyser's queue. Each blocking
//! operation carries a one-shot reply sender; the submitter holds the
//! receiver, so fire-once semantics are enforced by the channel itself.

use tokio::sync::oneshot;

use crate::app::AppSummary;
use crate::data_info::DataAccessGrant;
use crate::dispatcher::TaskOutcome;
use crate::error::{TaskException, WaitError};
use crate::graph::GraphSnapshot;
use crate::task::{ExecutionHandle, Task};
use crate::types::{AppId, DataRef, Direction, TaskId};

// ============================================================================
// REQUEST PAYLOADS
// ============================================================================

#[derive(Debug)]
pub struct NewTaskRequest {
    pub task: Task,
    pub exception: Option<TaskException>,
}

#[derive(Debug)]
pub struct MainAccessRequest {
    pub app: AppId,
    pub data: DataRef,
    pub direction: Direction,
    pub reply: oneshot::Sender<Result<DataAccessGrant, WaitError>>,
}

#[derive(Debug)]
pub struct TaskEndedRequest {
    pub task: TaskId,
    pub outcome: TaskOutcome,
    /// Reference into the dispatcher for the execution that ended.
    pub handle: Option<ExecutionHandle>,
    pub exception: Option<TaskException>,
}

#[derive(Debug)]
pub struct BarrierRequest {
    pub app: AppId,
    pub reply: oneshot::Sender<AppSummary>,
}

#[derive(Debug)]
pub struct EndOfAppRequest {
    pub app: AppId,
    pub reply: oneshot::Sender<AppSummary>,
}

#[derive(Debug)]
pub struct SnapshotRequest {
    pub reply: oneshot::Sender<GraphSnapshot>,
}

// ============================================================================
// REQUEST
// ============================================================================

/// One queue entry. The first five tags are the application-facing
/// operations; `Snapshot` and `Shutdown` are control-plane entries that
/// ride the same queue so they observe a consistent graph.
#[derive(Debug)]
pub enum Request {
    NewTask(NewTaskRequest),
    MainAccess(MainAccessRequest),
    TaskEnded(TaskEndedRequest),
    Barrier(BarrierRequest),
    EndOfApp(EndOfAppRequest),
    Snapshot(SnapshotRequest),
    Shutdown,
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::NewTask(_) => "new_task",
            Request::MainAccess(_) => "main_access",
            Request::TaskEnded(_) => "task_ended",
            Request::Barrier(_) => "barrier",
            Request::EndOfApp(_) => "end_of_app",
            Request::Snapshot(_) => "snapshot",
            Request::Shutdown => "shutdown",
        }
    }

    /// Attach a user exception to the request.
    ///
    /// Only `NewTask` and `TaskEnded` support exceptions; on any other
    /// kind the exception is silently discarded. End-of-app in
    /// particular never carries one.
    pub fn set_exception(&mut self, exception: TaskException) {
        match self {
            Request::NewTask(r) => r.exception = Some(exception),
            Request::TaskEnded(r) => r.exception = Some(exception),
            _ => {}
        }
    }

    pub fn exception(&self) -> Option<&TaskException> {
        match self {
            Request::NewTask(r) => r.exception.as_ref(),
            Request::TaskEnded(r) => r.exception.as_ref(),
            _ => None,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskDescription;

    fn new_task_request() -> Request {
        Request::NewTask(NewTaskRequest {
            task: Task::new(
                TaskId::from_raw(1),
                AppId::from_raw(1),
                TaskDescription::method("step"),
            ),
            exception: None,
        })
    }

    #[test]
    fn new_task_carries_exceptions() {
        let mut request = new_task_request();
        request.set_exception(TaskException::new("user abort"));
        assert_eq!(request.exception().unwrap().message, "user abort");
    }

    #[test]
    fn task_ended_carries_exceptions() {
        let mut request = Request::TaskEnded(TaskEndedRequest {
            task: TaskId::from_raw(1),
            outcome: TaskOutcome::Success,
            handle: None,
            exception: None,
        });
        request.set_exception(TaskException::new("late abort"));
        assert!(request.exception().is_some());
    }

    #[test]
    fn end_of_app_silently_drops_exceptions() {
        let (reply, _rx) = oneshot::channel();
        let mut request = Request::EndOfApp(EndOfAppRequest {
            app: AppId::from_raw(1),
            reply,
        });
        request.set_exception(TaskException::new("ignored"));
        assert!(request.exception().is_none());
    }

    #[test]
    fn barrier_drops_exceptions_too() {
        let (reply, _rx) = oneshot::channel();
        let mut request = Request::Barrier(BarrierRequest {
            app: AppId::from_raw(1),
            reply,
        });
        request.set_exception(TaskException::new("ignored"));
        assert!(request.exception().is_none());
    }

    #[test]
    fn kind_labels_cover_every_tag() {
        assert_eq!(new_task_request().kind(), "new_task");
        assert_eq!(Request::Shutdown.kind(), "shutdown");
    }
}
