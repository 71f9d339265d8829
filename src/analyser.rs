//! # Task analyser
//!
//! Single consumer of the request queue. Every mutation of the graph,
//! the data registry and the application table happens here, which is
//! what lets the rest of the crate stay lock-free: one request is
//! processed to completion before the next is dequeued.
//!
//! ## Per-parameter dependency wiring
//!
//! | direction   | ordered after                 | version   |
//! |-------------|-------------------------------|-----------|
//! | in          | producers of current version  | unchanged |
//! | out, inout  | producers and current readers | bumped    |
//! | concurrent, | pre-group producers only (no  | bumped on |
//! | commutative | edges among peers)            | group close |
//!
//! An enforcing predecessor, when present, is wired before any data
//! edge. Tasks with no predecessors go straight to the dispatcher.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::app::{AppStatus, Application};
use crate::data_info::{DataAccessGrant, DataInfoProvider};
use crate::dispatcher::{DispatchTicket, TaskDispatcher, TaskOutcome};
use crate::error::{AnalyserFault, WaitError};
use crate::graph::TaskGraph;
use crate::request::{
    BarrierRequest, EndOfAppRequest, MainAccessRequest, NewTaskRequest, Request, TaskEndedRequest,
};
use crate::task::TaskState;
use crate::types::{AppId, TaskId};

// ============================================================================
// PENDING MAIN ACCESSES
// ============================================================================

/// A main-thread access parked until its producers finish.
struct PendingMainAccess {
    remaining: HashSet<TaskId>,
    grant: DataAccessGrant,
    reply: oneshot::Sender<Result<DataAccessGrant, WaitError>>,
}

/// Failure record for a task already reclaimed from the graph, kept
/// until its application completes so late arrivals (main accesses,
/// enforcing hints) still observe the failure.
struct FailedTask {
    app: AppId,
    reason: String,
}

// ============================================================================
// ANALYSER
// ============================================================================

/// The analyser loop and the state it exclusively owns.
pub struct TaskAnalyser {
    rx: mpsc::UnboundedReceiver<Request>,
    graph: TaskGraph,
    data: DataInfoProvider,
    apps: HashMap<AppId, Application>,
    pending_main: Vec<PendingMainAccess>,
    failed_tasks: HashMap<TaskId, FailedTask>,
    dispatcher: Arc<dyn TaskDispatcher>,
    status_board: Arc<DashMap<AppId, AppStatus>>,
    closed: Arc<AtomicBool>,
}

impl TaskAnalyser {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<Request>,
        dispatcher: Arc<dyn TaskDispatcher>,
        status_board: Arc<DashMap<AppId, AppStatus>>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            rx,
            graph: TaskGraph::new(),
            data: DataInfoProvider::new(),
            apps: HashMap::new(),
            pending_main: Vec::new(),
            failed_tasks: HashMap::new(),
            dispatcher,
            status_board,
            closed,
        }
    }

    /// Consume requests until shutdown or fault.
    pub async fn run(mut self) {
        info!("task analyser started");
        while let Some(request) = self.rx.recv().await {
            if matches!(request, Request::Shutdown) {
                debug!("shutdown requested");
                break;
            }
            if let Err(fault) = self.process(request).await {
                error!(%fault, "analyser fault, closing the queue");
                self.abort();
                return;
            }
        }
        self.close_queue();
        info!("task analyser stopped");
        // Dropping the remaining state drops every parked reply sender;
        // pending waiters observe RuntimeAborted.
    }

    #[instrument(skip_all, fields(kind = request.kind()))]
    async fn process(&mut self, request: Request) -> Result<(), AnalyserFault> {
        trace!("processing request");
        match request {
            Request::NewTask(r) => self.handle_new_task(r).await,
            Request::MainAccess(r) => self.handle_main_access(r),
            Request::TaskEnded(r) => self.handle_task_ended(r).await,
            Request::Barrier(r) => {
                self.handle_barrier(r);
                Ok(())
            }
            Request::EndOfApp(r) => {
                self.handle_end_of_app(r);
                Ok(())
            }
            Request::Snapshot(r) => {
                let _ = r.reply.send(self.graph.snapshot());
                Ok(())
            }
            Request::Shutdown => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // new task
    // ------------------------------------------------------------------

    async fn handle_new_task(&mut self, request: NewTaskRequest) -> Result<(), AnalyserFault> {
        let NewTaskRequest { mut task, exception } = request;
        let id = task.id();
        let app_id = task.app_id();

        let app = Self::ensure_app(&mut self.apps, &self.status_board, app_id);
        if let Some(exception) = exception {
            app.record_exception(exception);
        }
        if !app.accepts_tasks() {
            // The submitter raced end-of-app; the synchronous check in
            // the access processor rejects once the flag is visible.
            warn!(task = %id, %app_id, "task submitted after end-of-app, dropped");
            return Ok(());
        }
        app.register_task(id);

        // An enforcing predecessor that already failed dooms the task
        // before analysis; its data accesses are never registered.
        if let Some(enforcing) = task.enforcing() {
            if !self.graph.contains(enforcing) {
                if let Some(record) = self.failed_tasks.get(&enforcing) {
                    let reason = format!("enforcing task {enforcing} failed: {}", record.reason);
                    warn!(task = %id, %enforcing, "enforcing predecessor already failed");
                    self.graph.insert(task);
                    return self.fail_cascade(id, &reason);
                }
            }
        }

        // The enforcing hint is wired before any data edge.
        let mut producers: Vec<TaskId> = task.enforcing().into_iter().collect();

        let accesses: Vec<_> = task
            .description()
            .parameters
            .iter()
            .filter_map(|p| p.data_ref().map(|r| (r, p.direction())))
            .collect();
        for (data_ref, direction) in accesses {
            let plan = self.data.access(&data_ref, direction, id);
            if let (Some(read), Some(written)) = (plan.read_version, plan.written_version) {
                if written <= read {
                    return Err(AnalyserFault::VersionRegression { data: plan.data });
                }
            }
            task.accesses.extend(plan.records());
            producers.extend(plan.depends_on);
        }

        self.graph.insert(task);
        let mut wired = 0usize;
        for from in producers {
            if self.graph.add_edge(from, id) {
                wired += 1;
            }
        }
        debug!(task = %id, %app_id, edges = wired, "task analysed");

        if self.graph.get(id).map(|t| t.is_ready()).unwrap_or(false) {
            self.dispatch(id).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // task ended
    // ------------------------------------------------------------------

    async fn handle_task_ended(&mut self, request: TaskEndedRequest) -> Result<(), AnalyserFault> {
        let TaskEndedRequest {
            task: id,
            outcome,
            handle,
            exception,
        } = request;

        let (app_id, remaining) = {
            let Some(task) = self.graph.get_mut(id) else {
                warn!(task = %id, "completion for a task not in the graph, ignored");
                return Ok(());
            };
            if task.state() == TaskState::ToAnalyse {
                return Err(AnalyserFault::PrematureCompletion { task: id });
            }
            if let Some(handle) = handle {
                task.attach_handle(handle);
            }
            if outcome.is_success() {
                task.pending_executions = task.pending_executions.saturating_sub(1);
            }
            (task.app_id(), task.pending_executions)
        };

        if let Some(exception) = exception {
            if let Some(app) = self.apps.get_mut(&app_id) {
                app.record_exception(exception);
            }
        }

        match outcome {
            TaskOutcome::Success if remaining > 0 => {
                debug!(task = %id, remaining, "execution ended, replicas outstanding");
                Ok(())
            }
            TaskOutcome::Success => self.finish_task(id).await,
            TaskOutcome::Failure(reason) => {
                warn!(task = %id, %reason, "execution failed");
                self.fail_cascade(id, &reason)
            }
        }
    }

    /// Terminal success: release successors, registry references and
    /// application waiters, then reclaim the task.
    async fn finish_task(&mut self, id: TaskId) -> Result<(), AnalyserFault> {
        self.graph
            .get_mut(id)
            .ok_or(AnalyserFault::MissingTask(id))?
            .set_state(TaskState::Finished)?;
        let task = self
            .graph
            .remove(id)
            .ok_or(AnalyserFault::MissingTask(id))?;
        self.data.release_task(id, &task.accesses);

        // Newly ready successors dispatch in id order.
        for succ in task.successors().iter().copied() {
            if self.graph.get(succ).map(|t| t.is_ready()).unwrap_or(false) {
                self.dispatch(succ).await?;
            }
        }

        debug!(task = %id, "task finished");
        self.settle_app(task.app_id(), id, false);
        self.settle_main_accesses(id, None);
        Ok(())
    }

    /// Terminal failure: the task and its transitive successors fail
    /// without execution.
    fn fail_cascade(&mut self, root: TaskId, reason: &str) -> Result<(), AnalyserFault> {
        let mut order = vec![root];
        let mut seen: HashSet<TaskId> = order.iter().copied().collect();
        let mut cursor = 0;
        while cursor < order.len() {
            if let Some(task) = self.graph.get(order[cursor]) {
                for succ in task.successors() {
                    if seen.insert(*succ) {
                        order.push(*succ);
                    }
                }
            }
            cursor += 1;
        }

        for id in order {
            let Some(task) = self.graph.get_mut(id) else {
                continue;
            };
            task.set_state(TaskState::Failed)?;
            let task = self
                .graph
                .remove(id)
                .ok_or(AnalyserFault::MissingTask(id))?;
            self.data.release_task(id, &task.accesses);
            if id != root {
                debug!(task = %id, %root, "failed by cascade");
            }
            self.failed_tasks.insert(
                id,
                FailedTask {
                    app: task.app_id(),
                    reason: reason.to_string(),
                },
            );
            self.settle_app(task.app_id(), id, true);
            self.settle_main_accesses(id, Some(reason));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // dispatch
    // ------------------------------------------------------------------

    async fn dispatch(&mut self, id: TaskId) -> Result<(), AnalyserFault> {
        let ticket = {
            let task = self
                .graph
                .get_mut(id)
                .ok_or(AnalyserFault::MissingTask(id))?;
            task.set_state(TaskState::ToExecute)?;
            DispatchTicket {
                task: id,
                app: task.app_id(),
                description: task.description().clone(),
            }
        };
        // The dispatcher owns the replication degree (it knows the
        // worker set); we only count completions against it.
        let degree = self.dispatcher.dispatch(ticket).await.max(1);
        if let Some(task) = self.graph.get_mut(id) {
            task.pending_executions = degree;
        }
        debug!(task = %id, degree, "task dispatched");
        Ok(())
    }

    // ------------------------------------------------------------------
    // main access, barrier, end-of-app
    // ------------------------------------------------------------------

    fn handle_main_access(&mut self, request: MainAccessRequest) -> Result<(), AnalyserFault> {
        let MainAccessRequest {
            app,
            data,
            direction,
            reply,
        } = request;
        Self::ensure_app(&mut self.apps, &self.status_board, app);

        let (grant, wait_for) = self.data.main_access(&data, direction);
        // Producers already reclaimed are terminal, but only a finished
        // one satisfies the access; a failed one never produced the
        // data.
        let mut remaining: HashSet<TaskId> = HashSet::new();
        for producer in wait_for {
            if self.graph.contains(producer) {
                remaining.insert(producer);
            } else if let Some(record) = self.failed_tasks.get(&producer) {
                debug!(%app, %producer, "main access on a failed producer");
                let _ = reply.send(Err(WaitError::ProducerFailed {
                    task: producer,
                    reason: record.reason.clone(),
                }));
                return Ok(());
            }
        }
        debug!(%app, data = %grant.data, version = %grant.version, waiting = remaining.len(), "main access");

        if remaining.is_empty() {
            let _ = reply.send(Ok(grant));
        } else {
            self.pending_main.push(PendingMainAccess {
                remaining,
                grant,
                reply,
            });
        }
        Ok(())
    }

    fn handle_barrier(&mut self, request: BarrierRequest) {
        let app = Self::ensure_app(&mut self.apps, &self.status_board, request.app);
        app.add_barrier(request.reply);
        let summary = app.summary();
        let ready = app.collect_ready();
        debug!(app = %request.app, immediate = !ready.is_empty(), "barrier");
        for reply in ready {
            let _ = reply.send(summary.clone());
        }
    }

    fn handle_end_of_app(&mut self, request: EndOfAppRequest) {
        let app_id = request.app;
        let app = Self::ensure_app(&mut self.apps, &self.status_board, app_id);
        app.request_end(request.reply);
        let complete = app.is_complete();
        let summary = app.summary();
        let ready = app.collect_ready();
        self.status_board.insert(
            app_id,
            if complete {
                AppStatus::Finished
            } else {
                AppStatus::Ending
            },
        );
        info!(%app_id, complete, "end of application requested");
        for reply in ready {
            let _ = reply.send(summary.clone());
        }
    }

    // ------------------------------------------------------------------
    // shared plumbing
    // ------------------------------------------------------------------

    fn ensure_app<'a>(
        apps: &'a mut HashMap<AppId, Application>,
        board: &DashMap<AppId, AppStatus>,
        id: AppId,
    ) -> &'a mut Application {
        apps.entry(id).or_insert_with(|| {
            board.insert(id, AppStatus::Active);
            Application::new(id)
        })
    }

    /// Account one terminal task against its application and fire any
    /// waiter whose condition now holds.
    fn settle_app(&mut self, app_id: AppId, task: TaskId, failed: bool) {
        let Some(app) = self.apps.get_mut(&app_id) else {
            return;
        };
        app.task_terminated(task, failed);
        let summary = app.summary();
        let complete = app.is_complete();
        let ready = app.collect_ready();
        for reply in ready {
            let _ = reply.send(summary.clone());
        }
        if complete {
            self.status_board.insert(app_id, AppStatus::Finished);
            // Failure records are only needed while the application can
            // still submit work or wait on data.
            self.failed_tasks.retain(|_, record| record.app != app_id);
            info!(%app_id, finished = summary.finished, failed = summary.failed, "application complete");
        }
    }

    /// Let parked main accesses observe one terminal producer.
    fn settle_main_accesses(&mut self, task: TaskId, failure: Option<&str>) {
        let pending = std::mem::take(&mut self.pending_main);
        for mut access in pending {
            let was_producer = access.remaining.remove(&task);
            if was_producer {
                if let Some(reason) = failure {
                    let _ = access.reply.send(Err(WaitError::ProducerFailed {
                        task,
                        reason: reason.to_string(),
                    }));
                    continue;
                }
            }
            if access.remaining.is_empty() {
                let _ = access.reply.send(Ok(access.grant));
            } else {
                self.pending_main.push(access);
            }
        }
    }

    /// Fatal fault: close the queue and drop every parked waiter.
    fn abort(&mut self) {
        self.close_queue();
        for mut entry in self.status_board.iter_mut() {
            *entry.value_mut() = AppStatus::Aborted;
        }
        self.apps.clear();
        self.pending_main.clear();
        self.failed_tasks.clear();
    }

    fn close_queue(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.rx.close();
        // Drain so queued reply senders drop and their waiters wake.
        while let Ok(request) = self.rx.try_recv() {
            drop(request);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    //! Loop-level behavior is covered end-to-end in `tests/`; here we
    //! pin the pieces that do not need a running queue.

    use super::*;
    use crate::dispatcher::RecordingDispatcher;
    use crate::task::{Task, TaskDescription};

    fn analyser() -> (mpsc::UnboundedSender<Request>, TaskAnalyser) {
        let (tx, rx) = mpsc::unbounded_channel();
        let analyser = TaskAnalyser::new(
            rx,
            Arc::new(RecordingDispatcher::new()),
            Arc::new(DashMap::new()),
            Arc::new(AtomicBool::new(false)),
        );
        (tx, analyser)
    }

    #[tokio::test]
    async fn new_task_without_dependencies_is_dispatched() {
        let (_tx, mut analyser) = analyser();
        let task = Task::new(
            TaskId::from_raw(1),
            AppId::from_raw(1),
            TaskDescription::method("step"),
        );
        analyser
            .handle_new_task(NewTaskRequest {
                task,
                exception: None,
            })
            .await
            .unwrap();

        let state = analyser.graph.get(TaskId::from_raw(1)).unwrap().state();
        assert_eq!(state, TaskState::ToExecute);
    }

    #[tokio::test]
    async fn completion_before_dispatch_is_a_fault() {
        let (_tx, mut analyser) = analyser();
        // Insert a task that never went through dispatch.
        analyser.graph.insert(Task::new(
            TaskId::from_raw(7),
            AppId::from_raw(1),
            TaskDescription::method("step"),
        ));

        let fault = analyser
            .handle_task_ended(TaskEndedRequest {
                task: TaskId::from_raw(7),
                outcome: TaskOutcome::Success,
                handle: None,
                exception: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(fault, AnalyserFault::PrematureCompletion { .. }));
    }

    #[tokio::test]
    async fn completion_for_unknown_task_is_ignored() {
        let (_tx, mut analyser) = analyser();
        analyser
            .handle_task_ended(TaskEndedRequest {
                task: TaskId::from_raw(99),
                outcome: TaskOutcome::Success,
                handle: None,
                exception: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn abort_marks_every_app() {
        let (_tx, mut analyser) = analyser();
        TaskAnalyser::ensure_app(
            &mut analyser.apps,
            &analyser.status_board,
            AppId::from_raw(1),
        );
        analyser.abort();

        assert_eq!(
            *analyser.status_board.get(&AppId::from_raw(1)).unwrap(),
            AppStatus::Aborted
        );
        assert!(analyser.closed.load(Ordering::SeqCst));
    }
}
