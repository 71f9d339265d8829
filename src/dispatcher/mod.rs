//! # Dispatcher abstraction layer
//!
//! Trait and test implementation for the downstream execution engine.
//!
//! ## Contract
//!
//! The analyser calls [`TaskDispatcher::dispatch`] exactly once per
//! task, when the task enters `to_execute`. The dispatcher promises to
//! eventually report each execution back through the access processor's
//! `task_ended`. It may reorder ready tasks but must not introduce
//! ordering between tasks the analyser has not already ordered.
//!
//! The return value of `dispatch` is the number of executions the
//! dispatcher will run for the task (the replication degree, at least
//! 1); the task is free only once that many completions arrived.

mod mock;

pub use mock::RecordingDispatcher;

use async_trait::async_trait;

use crate::task::{TaskDescription, TaskFlags};
use crate::types::{AppId, TaskId};

// ============================================================================
// OUTCOME
// ============================================================================

/// Result of one execution, reported by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    Failure(String),
}

impl TaskOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        TaskOutcome::Failure(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success)
    }
}

// ============================================================================
// DISPATCH TICKET
// ============================================================================

/// Everything the dispatcher needs to place one ready task.
#[derive(Debug, Clone)]
pub struct DispatchTicket {
    pub task: TaskId,
    pub app: AppId,
    pub description: TaskDescription,
}

impl DispatchTicket {
    pub fn flags(&self) -> &TaskFlags {
        &self.description.flags
    }

    pub fn is_prioritary(&self) -> bool {
        self.description.flags.prioritary
    }
}

// ============================================================================
// DISPATCHER TRAIT
// ============================================================================

/// Sink for ready tasks.
///
/// Implementations run in their own threads; the hand-off must be a
/// non-blocking enqueue into a dispatcher-owned ready set.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Accept one ready task and return its replication degree.
    async fn dispatch(&self, ticket: DispatchTicket) -> u32;
}

// ============================================================================
// TESTS
// ============================================================================
