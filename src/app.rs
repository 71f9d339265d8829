//! # Application bookkeeping
//!
//! Per-application state owned by the analyser: the live-task set, the
//! no-more-tasks flag, pending barriers and end-of-app waiters, and the
//! completion aggregate handed back to blocking callers.

use std::collections::HashSet;

use tokio::sync::oneshot;

use crate::error::TaskException;
use crate::types::{AppId, TaskId};

// ============================================================================
// STATUS BOARD
// ============================================================================

/// Coarse application status, published by the analyser on a shared
/// board so the access processor can reject submissions synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppStatus {
    /// Accepting tasks.
    Active,
    /// End-of-app received, tasks still draining.
    Ending,
    /// All tasks terminal and end-of-app signalled.
    Finished,
    /// The analyser aborted.
    Aborted,
}

impl AppStatus {
    pub fn accepts_tasks(self) -> bool {
        matches!(self, AppStatus::Active)
    }
}

// ============================================================================
// SUMMARY
// ============================================================================

/// Completion aggregate returned by barrier and end-of-app waits.
///
/// A failing application shows up as `failed > 0`; a recorded user
/// exception rides along so the caller can rethrow it.
#[derive(Debug, Clone)]
pub struct AppSummary {
    pub app: AppId,
    pub finished: u64,
    pub failed: u64,
    pub exception: Option<TaskException>,
}

impl AppSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.exception.is_none()
    }
}

// ============================================================================
// APPLICATION
// ============================================================================

/// A barrier waiting for the tasks that preceded it.
#[derive(Debug)]
struct PendingBarrier {
    remaining: HashSet<TaskId>,
    reply: oneshot::Sender<AppSummary>,
}

/// One submitting application.
#[derive(Debug)]
pub struct Application {
    id: AppId,
    live_tasks: HashSet<TaskId>,
    finished: u64,
    failed: u64,
    no_more_tasks: bool,
    barriers: Vec<PendingBarrier>,
    end_waiters: Vec<oneshot::Sender<AppSummary>>,
    exception: Option<TaskException>,
}

impl Application {
    pub fn new(id: AppId) -> Self {
        Self {
            id,
            live_tasks: HashSet::new(),
            finished: 0,
            failed: 0,
            no_more_tasks: false,
            barriers: Vec::new(),
            end_waiters: Vec::new(),
            exception: None,
        }
    }

    pub fn id(&self) -> AppId {
        self.id
    }

    pub fn live_tasks(&self) -> usize {
        self.live_tasks.len()
    }

    pub fn accepts_tasks(&self) -> bool {
        !self.no_more_tasks
    }

    /// All tasks terminal and no more coming.
    pub fn is_complete(&self) -> bool {
        self.no_more_tasks && self.live_tasks.is_empty()
    }

    pub fn summary(&self) -> AppSummary {
        AppSummary {
            app: self.id,
            finished: self.finished,
            failed: self.failed,
            exception: self.exception.clone(),
        }
    }

    pub fn register_task(&mut self, task: TaskId) {
        self.live_tasks.insert(task);
    }

    /// Record a terminal transition of one task.
    pub fn task_terminated(&mut self, task: TaskId, failed: bool) {
        if self.live_tasks.remove(&task) {
            if failed {
                self.failed += 1;
            } else {
                self.finished += 1;
            }
        }
        for barrier in &mut self.barriers {
            barrier.remaining.remove(&task);
        }
    }

    /// Park a barrier on the currently live tasks. Tasks submitted
    /// later do not hold it back.
    pub fn add_barrier(&mut self, reply: oneshot::Sender<AppSummary>) {
        self.barriers.push(PendingBarrier {
            remaining: self.live_tasks.clone(),
            reply,
        });
    }

    /// Set the no-more-tasks flag and park the end-of-app waiter.
    pub fn request_end(&mut self, reply: oneshot::Sender<AppSummary>) {
        self.no_more_tasks = true;
        self.end_waiters.push(reply);
    }

    /// Keep the first user exception for the completion aggregate.
    pub fn record_exception(&mut self, exception: TaskException) {
        self.exception.get_or_insert(exception);
    }

    /// Drain every waiter whose condition now holds. The caller sends
    /// the current summary on each returned channel.
    pub fn collect_ready(&mut self) -> Vec<oneshot::Sender<AppSummary>> {
        let mut ready = Vec::new();
        let mut parked = Vec::new();
        for barrier in self.barriers.drain(..) {
            if barrier.remaining.is_empty() {
                ready.push(barrier.reply);
            } else {
                parked.push(barrier);
            }
        }
        self.barriers = parked;
        if self.is_complete() {
            ready.append(&mut self.end_waiters);
        }
        ready
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: u64) -> TaskId {
        TaskId::from_raw(id)
    }

    fn app() -> Application {
        Application::new(AppId::from_raw(1))
    }

    #[test]
    fn barrier_waits_for_prior_tasks_only() {
        let mut app = app();
        app.register_task(t(1));

        let (reply, mut rx) = oneshot::channel();
        app.add_barrier(reply);

        // A task submitted after the barrier does not hold it back.
        app.register_task(t(2));
        assert!(app.collect_ready().is_empty());

        app.task_terminated(t(1), false);
        let ready = app.collect_ready();
        assert_eq!(ready.len(), 1);
        ready
            .into_iter()
            .for_each(|s| s.send(app.summary()).unwrap_or(()));
        assert_eq!(rx.try_recv().unwrap().finished, 1);
    }

    #[test]
    fn barrier_on_idle_app_is_immediately_ready() {
        let mut app = app();
        let (reply, _rx) = oneshot::channel();
        app.add_barrier(reply);
        assert_eq!(app.collect_ready().len(), 1);
    }

    #[test]
    fn end_waits_for_flag_and_drain() {
        let mut app = app();
        app.register_task(t(1));

        let (reply, _rx) = oneshot::channel();
        app.request_end(reply);
        assert!(!app.accepts_tasks());
        assert!(app.collect_ready().is_empty());

        app.task_terminated(t(1), true);
        assert!(app.is_complete());
        assert_eq!(app.collect_ready().len(), 1);
        assert_eq!(app.summary().failed, 1);
        assert!(!app.summary().is_clean());
    }

    #[test]
    fn first_exception_wins() {
        let mut app = app();
        app.record_exception(TaskException::new("first"));
        app.record_exception(TaskException::new("second"));
        assert_eq!(app.summary().exception.unwrap().message, "first");
    }
}
