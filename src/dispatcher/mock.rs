//! Recording dispatcher for tests
//!
//! Keeps every dispatched ticket in a ready queue that honors the
//! prioritary flag, plus an arrival log for assertions. No execution
//! happens; tests drain the queue and report completions themselves.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{DispatchTicket, TaskDispatcher};
use crate::types::TaskId;

/// Test dispatcher that records instead of executing.
#[derive(Clone)]
pub struct RecordingDispatcher {
    /// Ready set in execution order: prioritary tickets jump to the
    /// head, everything else keeps arrival order (which is id order,
    /// since the analyser releases ready tasks lowest-id first).
    ready: Arc<Mutex<VecDeque<DispatchTicket>>>,
    /// Arrival log, untouched by `next_ready`.
    arrivals: Arc<Mutex<Vec<TaskId>>>,
    /// Replication degree reported for every task.
    replication: u32,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(Mutex::new(VecDeque::new())),
            arrivals: Arc::new(Mutex::new(Vec::new())),
            replication: 1,
        }
    }

    /// Report `degree` executions per task, as a replicating engine
    /// would.
    pub fn with_replication(mut self, degree: u32) -> Self {
        self.replication = degree;
        self
    }

    /// Ids in the order the analyser handed them over.
    pub fn arrivals(&self) -> Vec<TaskId> {
        self.arrivals.lock().unwrap().clone()
    }

    /// Ids in the order this dispatcher would execute them.
    pub fn execution_order(&self) -> Vec<TaskId> {
        self.ready.lock().unwrap().iter().map(|t| t.task).collect()
    }

    /// Pop the next ticket to execute, if any.
    pub fn next_ready(&self) -> Option<DispatchTicket> {
        self.ready.lock().unwrap().pop_front()
    }

    /// Drain the whole ready set in execution order.
    pub fn drain_ready(&self) -> Vec<DispatchTicket> {
        self.ready.lock().unwrap().drain(..).collect()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.lock().unwrap().len()
    }
}

impl Default for RecordingDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskDispatcher for RecordingDispatcher {
    async fn dispatch(&self, ticket: DispatchTicket) -> u32 {
        self.arrivals.lock().unwrap().push(ticket.task);
        let mut ready = self.ready.lock().unwrap();
        if ticket.is_prioritary() {
            ready.push_front(ticket);
        } else {
            ready.push_back(ticket);
        }
        self.replication
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskDescription;
    use crate::types::AppId;

    fn ticket(id: u64, prioritary: bool) -> DispatchTicket {
        let description = if prioritary {
            TaskDescription::method("step").prioritary()
        } else {
            TaskDescription::method("step")
        };
        DispatchTicket {
            task: TaskId::from_raw(id),
            app: AppId::from_raw(1),
            description,
        }
    }

    #[tokio::test]
    async fn prioritary_jumps_the_queue() {
        let dispatcher = RecordingDispatcher::new();
        dispatcher.dispatch(ticket(1, false)).await;
        dispatcher.dispatch(ticket(2, false)).await;
        dispatcher.dispatch(ticket(3, true)).await;

        assert_eq!(
            dispatcher.execution_order(),
            vec![
                TaskId::from_raw(3),
                TaskId::from_raw(1),
                TaskId::from_raw(2)
            ]
        );
        // Arrival log keeps the analyser's order.
        assert_eq!(
            dispatcher.arrivals(),
            vec![
                TaskId::from_raw(1),
                TaskId::from_raw(2),
                TaskId::from_raw(3)
            ]
        );
    }

    #[tokio::test]
    async fn replication_degree_is_reported() {
        let dispatcher = RecordingDispatcher::new().with_replication(3);
        let degree = dispatcher.dispatch(ticket(1, false)).await;
        assert_eq!(degree, 3);
    }

    #[tokio::test]
    async fn next_ready_consumes_in_execution_order() {
        let dispatcher = RecordingDispatcher::new();
        dispatcher.dispatch(ticket(1, false)).await;
        dispatcher.dispatch(ticket(2, true)).await;

        assert_eq!(dispatcher.next_ready().unwrap().task, TaskId::from_raw(2));
        assert_eq!(dispatcher.next_ready().unwrap().task, TaskId::from_raw(1));
        assert!(dispatcher.next_ready().is_none());
    }
}
