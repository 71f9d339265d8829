//! # Error types
//!
//! One thiserror enum per concern, wrapped by a top-level [`SluiceError`]
//! for callers that aggregate:
//!
//! - [`SubmissionError`] - returned synchronously by the access processor
//! - [`WaitError`] - outcome of a blocking wait (barrier, end-of-app,
//!   main access)
//! - [`AnalyserFault`] - internal invariant violation; fatal to the
//!   analyser loop and reported to every pending waiter as
//!   `RuntimeAborted`
//! - [`TaskException`] - user-domain exception carried on requests that
//!   support it

use thiserror::Error;

use crate::task::TaskState;
use crate::types::{AppId, DataId, TaskId};

// ============================================================================
// SUBMISSION ERRORS
// ============================================================================

/// Errors returned synchronously to the submitting thread.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// The request queue has been shut down.
    #[error("request queue is closed")]
    QueueClosed,

    /// The application already signalled end-of-app; it accepts no
    /// further tasks.
    #[error("application {0} has finished, no more tasks accepted")]
    AppFinished(AppId),

    /// The task description failed validation.
    #[error("invalid task description: {0}")]
    InvalidDescription(String),
}

// ============================================================================
// WAIT ERRORS
// ============================================================================

/// Why a blocking wait did not produce its value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The caller-supplied timeout elapsed. The request stays in the
    /// graph and may still complete.
    #[error("wait timed out")]
    Timeout,

    /// The analyser aborted on an internal fault; the signal will never
    /// fire.
    #[error("runtime aborted")]
    RuntimeAborted,

    /// The request could not be enqueued because the queue is closed.
    #[error("request queue is closed")]
    QueueClosed,

    /// A main access waited on a producer that failed.
    #[error("producer {task} failed: {reason}")]
    ProducerFailed { task: TaskId, reason: String },
}

// ============================================================================
// TASK EXCEPTION
// ============================================================================

/// A user-domain exception raised inside a task.
///
/// Carried on `NEW_TASK` and `TASK_ENDED` requests; an end-of-app
/// request silently discards any exception set on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("task exception: {message}")]
pub struct TaskException {
    pub message: String,
}

impl TaskException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ============================================================================
// ANALYSER FAULTS
// ============================================================================

/// Invariant violations inside the analyser. Any of these closes the
/// request queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyserFault {
    /// A task attempted an illegal state transition.
    #[error("illegal state transition for {task}: {from} -> {to}")]
    StateViolation {
        task: TaskId,
        from: TaskState,
        to: TaskState,
    },

    /// A completion arrived for a task that was never dispatched.
    #[error("completion for {task} which was never dispatched")]
    PrematureCompletion { task: TaskId },

    /// A task the analyser expected in the graph is gone.
    #[error("task {0} missing from the graph")]
    MissingTask(TaskId),

    /// The registry produced a version that does not supersede the
    /// current one.
    #[error("non-monotonic version on {data}")]
    VersionRegression { data: DataId },
}

// ============================================================================
// TOP-LEVEL ERROR
// ============================================================================

/// Top-level error for callers that funnel everything into one type.
#[derive(Debug, Error)]
pub enum SluiceError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Fault(#[from] AnalyserFault),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_error_messages() {
        let err = SubmissionError::AppFinished(AppId::from_raw(3));
        assert!(err.to_string().contains("app3"));
        assert_eq!(
            SubmissionError::QueueClosed.to_string(),
            "request queue is closed"
        );
    }

    #[test]
    fn wait_error_reports_producer() {
        let err = WaitError::ProducerFailed {
            task: TaskId::from_raw(9),
            reason: "boom".into(),
        };
        assert!(err.to_string().contains("t9"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn sluice_error_wraps_submission() {
        let err: SluiceError = SubmissionError::QueueClosed.into();
        assert!(matches!(
            err,
            SluiceError::Submission(SubmissionError::QueueClosed)
        ));
    }
}
