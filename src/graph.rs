//! # Task graph
//!
//! Single container keyed by task id; predecessor and successor entries
//! are id sets, so removing an id reclaims the task no matter how many
//! edges pointed at it. Every mutation keeps edge symmetry: `b` is in
//! `a.successors` exactly when `a` is in `b.predecessors`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskState};
use crate::types::{AppId, TaskId};

// ============================================================================
// GRAPH
// ============================================================================

#[derive(Debug, Default)]
pub struct TaskGraph {
    tasks: HashMap<TaskId, Task>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, task: Task) {
        self.tasks.insert(task.id(), task);
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Add `from -> to`. Skipped when the producer is gone or already
    /// terminal (the dependency is satisfied) and for self-edges.
    /// Returns whether an edge was recorded.
    pub fn add_edge(&mut self, from: TaskId, to: TaskId) -> bool {
        if from == to || !self.tasks.contains_key(&to) {
            return false;
        }
        let producer_live = self
            .tasks
            .get(&from)
            .map(|t| !t.state().is_terminal())
            .unwrap_or(false);
        if !producer_live {
            return false;
        }
        let added = self
            .tasks
            .get_mut(&from)
            .map(|t| t.successors.insert(to))
            .unwrap_or(false);
        if let Some(consumer) = self.tasks.get_mut(&to) {
            consumer.predecessors.insert(from);
        }
        added
    }

    /// Remove a task, stripping its edges from both sides.
    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let task = self.tasks.remove(&id)?;
        for pred in &task.predecessors {
            if let Some(p) = self.tasks.get_mut(pred) {
                p.successors.remove(&id);
            }
        }
        for succ in &task.successors {
            if let Some(s) = self.tasks.get_mut(succ) {
                s.predecessors.remove(&id);
            }
        }
        Some(task)
    }

    /// Tasks of one application, in id order.
    pub fn tasks_of(&self, app: AppId) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.app_id() == app)
            .map(|t| t.id())
            .collect();
        ids.sort();
        ids
    }

    /// Point-in-time view of the live graph for external rendering.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut tasks: Vec<TaskSnapshot> = self.tasks.values().map(TaskSnapshot::from).collect();
        tasks.sort_by_key(|t| t.id);
        GraphSnapshot { tasks }
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Serializable view of one task, carrying the flags an external
/// renderer needs (shapes and colors are its business, not ours).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub app_id: AppId,
    pub state: TaskState,
    pub predecessors: Vec<TaskId>,
    pub successors: Vec<TaskId>,
    pub prioritary: bool,
    pub replicated: bool,
    pub distributed: bool,
    pub service: bool,
    pub num_nodes: u32,
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        let flags = task.description().flags;
        Self {
            id: task.id(),
            app_id: task.app_id(),
            state: task.state(),
            predecessors: task.predecessors().iter().copied().collect(),
            successors: task.successors().iter().copied().collect(),
            prioritary: flags.prioritary,
            replicated: flags.replicated,
            distributed: flags.distributed,
            service: task.description().is_service(),
            num_nodes: flags.num_nodes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub tasks: Vec<TaskSnapshot>,
}

impl GraphSnapshot {
    pub fn task(&self, id: TaskId) -> Option<&TaskSnapshot> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn has_edge(&self, from: TaskId, to: TaskId) -> bool {
        self.task(from)
            .map(|t| t.successors.contains(&to))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
